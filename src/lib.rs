//! Reliable background upload core for evidence photos.
//!
//! Offline-first upload subsystem: submissions are compressed for the
//! current device profile, persisted to a durable SQLite queue, and drained
//! by a background worker with exponential retry/backoff. Foreground
//! contexts talk to the worker over typed channels and receive completion
//! and persistence events by broadcast.

pub mod db_migration;
pub mod domains;
pub mod errors;
pub mod globals;

use std::sync::Arc;

pub use domains::compression::{compress_image, CompressedImage};
pub use domains::device::{
    BrowserFamily, ConnectionType, DeviceProfile, EnvironmentHints, PerformanceTier,
};
pub use domains::messaging::bridge::UploadConfigProvider;
pub use domains::messaging::types::{WorkerCommand, WorkerEvent};
pub use domains::queue::{QueueStatus, UploadPriority, UploadStatus};
pub use domains::upload::{
    EnqueueRequest, SubmitOutcome, UploadConfig, UploadManager, WorkerSettings,
};
pub use errors::{ServiceError, ServiceResult, UploadError};

/// Set up logging from `RUST_LOG` (and `.env`, if present). Safe to call
/// more than once.
pub fn init_logging() {
    let _ = dotenv::dotenv();
    let _ = env_logger::try_init();
}

/// Initialize the whole subsystem. See [`globals::initialize`].
pub async fn initialize(
    db_path: &str,
    hints: EnvironmentHints,
    provider: Arc<dyn UploadConfigProvider>,
) -> ServiceResult<()> {
    init_logging();
    globals::initialize(db_path, hints, provider).await
}

/// Convenience accessor for the global [`UploadManager`].
pub fn upload_manager() -> ServiceResult<Arc<UploadManager>> {
    globals::upload_manager()
}

/// Stop background tasks and close the database.
pub async fn shutdown() -> ServiceResult<()> {
    globals::shutdown().await
}
