// Declare submodules for the durable queue domain
pub mod repository;
pub mod types;

pub use repository::{SqliteUploadQueueRepository, UploadQueueRepository};
pub use types::{NewUploadItem, QueueStatus, UploadItem, UploadPriority, UploadStatus};
