//! Foreground facade for the upload subsystem.
//!
//! The manager is what application code talks to: it compresses the payload
//! for the current device profile, picks the delivery channel, and either
//! hands the item to the background worker or uploads it directly.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use uuid::Uuid;

use super::client::StorageUploadClient;
use super::strategy::{select_channel, UploadChannel};
use super::types::{destination_folder, generate_file_name};
use crate::domains::compression::compress_image;
use crate::domains::device::{CapabilityDetector, ConnectionType, DeviceProfile, EnvironmentHints};
use crate::domains::messaging::bridge::UploadConfigProvider;
use crate::domains::messaging::types::{WorkerCommand, WorkerEvent};
use crate::domains::queue::{NewUploadItem, QueueStatus, UploadPriority};
use crate::errors::{ServiceError, ServiceResult};

const DIRECT_CONFIG_TIMEOUT: Duration = Duration::from_secs(5);

/// One upload submission from application code
#[derive(Debug)]
pub struct EnqueueRequest {
    pub bytes: Vec<u8>,
    pub target_record_id: Uuid,
    pub target_field: String,
    pub file_name: String,
    pub priority: UploadPriority,
}

/// How a submission was carried out
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Handed to the background worker; completion arrives as a
    /// [`WorkerEvent`] later.
    Queued { item_id: Uuid },
    /// Uploaded directly; the caller persists the reference itself.
    Uploaded { url: String },
}

pub struct UploadManager {
    detector: Arc<dyn CapabilityDetector>,
    hints: RwLock<EnvironmentHints>,
    profile: RwLock<DeviceProfile>,
    command_tx: mpsc::Sender<WorkerCommand>,
    event_tx: broadcast::Sender<WorkerEvent>,
    direct_client: Arc<dyn StorageUploadClient>,
    config_provider: Arc<dyn UploadConfigProvider>,
    /// Constrained devices compress one payload at a time
    compression_gate: Mutex<()>,
}

impl UploadManager {
    pub fn new(
        detector: Arc<dyn CapabilityDetector>,
        hints: EnvironmentHints,
        command_tx: mpsc::Sender<WorkerCommand>,
        event_tx: broadcast::Sender<WorkerEvent>,
        direct_client: Arc<dyn StorageUploadClient>,
        config_provider: Arc<dyn UploadConfigProvider>,
    ) -> Self {
        let profile = detector.classify(&hints);
        log::info!(
            "upload manager ready: tier {}, {} concurrent upload(s)",
            profile.tier.as_str(),
            profile.safe_upload_concurrency()
        );

        Self {
            detector,
            hints: RwLock::new(hints),
            profile: RwLock::new(profile),
            command_tx,
            event_tx,
            direct_client,
            config_provider,
            compression_gate: Mutex::new(()),
        }
    }

    /// Compress the payload and deliver it over the channel the current
    /// device profile calls for.
    pub async fn submit(&self, request: EnqueueRequest) -> ServiceResult<SubmitOutcome> {
        let profile = self.profile.read().await.clone();

        let compressed = if profile.tier.is_constrained() {
            let _serial = self.compression_gate.lock().await;
            compress_image(request.bytes, &profile).await?
        } else {
            compress_image(request.bytes, &profile).await?
        };

        log::debug!(
            "compressed {} to {} bytes ({}x{} q{:.2})",
            request.file_name,
            compressed.bytes.len(),
            compressed.width,
            compressed.height,
            compressed.quality
        );

        let worker_ready = !self.command_tx.is_closed();
        match select_channel(&profile, worker_ready) {
            UploadChannel::Worker => {
                let item = NewUploadItem {
                    payload: compressed.bytes,
                    target_record_id: request.target_record_id,
                    target_field: request.target_field,
                    file_name: request.file_name,
                    content_type: compressed.content_type.to_string(),
                    priority: request.priority,
                };

                let (reply_tx, reply_rx) = oneshot::channel();
                self.command_tx
                    .send(WorkerCommand::EnqueueItem {
                        item,
                        reply: reply_tx,
                    })
                    .await
                    .map_err(|_| {
                        ServiceError::ServiceUnavailable("upload worker is not running".to_string())
                    })?;

                let item_id = reply_rx.await.map_err(|_| {
                    ServiceError::ServiceUnavailable(
                        "upload worker dropped the enqueue request".to_string(),
                    )
                })??;

                Ok(SubmitOutcome::Queued { item_id })
            }
            UploadChannel::Direct => {
                let url = self
                    .direct_upload(
                        &request.file_name,
                        compressed.content_type,
                        compressed.bytes,
                    )
                    .await?;
                Ok(SubmitOutcome::Uploaded { url })
            }
        }
    }

    async fn direct_upload(
        &self,
        original_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> ServiceResult<String> {
        let config = tokio::time::timeout(
            DIRECT_CONFIG_TIMEOUT,
            self.config_provider.upload_config(),
        )
        .await
        .map_err(|_| {
            ServiceError::Configuration("timed out waiting for upload configuration".to_string())
        })??;

        let now = chrono::Utc::now();
        let folder = destination_folder(&config.category, now);
        let file_name = generate_file_name(original_name, now);

        let asset = self
            .direct_client
            .upload(&config, &folder, &file_name, content_type, bytes)
            .await?;
        Ok(asset.url)
    }

    /// Current queue counters, fetched from the worker.
    pub async fn queue_status(&self) -> ServiceResult<QueueStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(WorkerCommand::GetQueueStatus { reply: reply_tx })
            .await?;
        self.await_reply(reply_rx).await?
    }

    /// User-triggered retry of a terminal item.
    pub async fn retry_item(&self, item_id: Uuid) -> ServiceResult<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(WorkerCommand::RetryItem {
            item_id,
            reply: reply_tx,
        })
        .await?;
        self.await_reply(reply_rx).await?
    }

    /// Remove completed items from the store; returns how many were removed.
    pub async fn clear_completed(&self) -> ServiceResult<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(WorkerCommand::ClearCompleted { reply: reply_tx })
            .await?;
        self.await_reply(reply_rx).await?
    }

    /// Ask the worker for a processing cycle right now.
    pub async fn process_queue_now(&self) -> ServiceResult<()> {
        self.send_command(WorkerCommand::ProcessQueueNow).await
    }

    /// Subscribe to worker notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Record a connection change, re-derive the device profile, and nudge
    /// the worker to drain whatever accumulated while offline.
    pub async fn connection_changed(&self, connection: ConnectionType) -> ServiceResult<()> {
        {
            let mut hints = self.hints.write().await;
            hints.connection = connection;
            *self.profile.write().await = self.detector.classify(&hints);
        }
        log::info!("connection changed to {:?}", connection);
        self.send_command(WorkerCommand::NetworkReconnected).await
    }

    pub async fn current_profile(&self) -> DeviceProfile {
        self.profile.read().await.clone()
    }

    async fn send_command(&self, command: WorkerCommand) -> ServiceResult<()> {
        self.command_tx.send(command).await.map_err(|_| {
            ServiceError::ServiceUnavailable("upload worker is not running".to_string())
        })
    }

    async fn await_reply<T>(&self, reply_rx: oneshot::Receiver<T>) -> ServiceResult<T> {
        reply_rx.await.map_err(|_| {
            ServiceError::ServiceUnavailable("upload worker dropped the request".to_string())
        })
    }
}
