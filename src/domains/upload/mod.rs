// Declare submodules for the upload domain
pub mod client;
pub mod manager;
pub mod scheduler;
pub mod strategy;
pub mod types;
pub mod worker;

pub use client::{HttpStorageUploadClient, StorageUploadClient};
pub use manager::{EnqueueRequest, SubmitOutcome, UploadManager};
pub use scheduler::LivenessScheduler;
pub use strategy::{select_channel, UploadChannel};
pub use types::{RemoteAsset, UploadConfig};
pub use worker::{UploadWorker, WorkerSettings};
