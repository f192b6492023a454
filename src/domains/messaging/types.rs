//! Message taxonomy between foreground contexts and the background worker.
//!
//! Closed tagged unions rather than string-keyed records: every message the
//! bridge can carry is a variant here, and request/response pairs carry a
//! `oneshot` reply channel.

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::domains::queue::{NewUploadItem, QueueStatus};
use crate::domains::upload::types::UploadConfig;
use crate::errors::ServiceResult;

/// Commands a foreground context can send to the background worker
#[derive(Debug)]
pub enum WorkerCommand {
    /// Persist a new item and trigger a processing cycle
    EnqueueItem {
        item: NewUploadItem,
        reply: oneshot::Sender<ServiceResult<Uuid>>,
    },
    /// Trigger a processing cycle immediately
    ProcessQueueNow,
    /// Synchronous queue-status query
    GetQueueStatus {
        reply: oneshot::Sender<ServiceResult<QueueStatus>>,
    },
    /// User-triggered retry of a terminal item
    RetryItem {
        item_id: Uuid,
        reply: oneshot::Sender<ServiceResult<bool>>,
    },
    /// Remove completed items from the store
    ClearCompleted {
        reply: oneshot::Sender<ServiceResult<u64>>,
    },
    /// Connectivity returned; drain whatever accumulated while offline
    NetworkReconnected,
    /// Drain control and stop the worker
    Shutdown { reply: oneshot::Sender<()> },
}

/// Notifications broadcast from the worker to every connected foreground
/// context. Duplicate delivery must be tolerated by receivers.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    UploadCompleted {
        item_id: Uuid,
        url: String,
        target_record_id: Uuid,
        target_field: String,
    },
    UploadError {
        item_id: Uuid,
        error: String,
    },
    /// Obligation for the foreground: write `{target_field: url}` against
    /// `target_record_id` in the primary record store.
    PersistRemoteReference {
        target_record_id: Uuid,
        target_field: String,
        url: String,
    },
    QueueStatusChanged {
        status: QueueStatus,
    },
}

/// Requests the worker makes of a foreground context. The worker cannot
/// reach privileged services directly, so transient upload credentials
/// come over this channel.
#[derive(Debug)]
pub enum ForegroundRequest {
    UploadConfig {
        reply: oneshot::Sender<ServiceResult<UploadConfig>>,
    },
}
