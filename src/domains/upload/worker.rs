//! Background worker that drains the durable upload queue.
//!
//! A single logical worker instance serves every foreground context. It is
//! driven by explicit triggers (enqueue, reconnect, heartbeat) plus a
//! periodic poll, claims up to three pending items per cycle, and applies
//! the exponential retry/backoff policy on failure.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::client::StorageUploadClient;
use super::types::{destination_folder, generate_file_name, RemoteAsset};
use crate::domains::messaging::bridge::request_upload_config;
use crate::domains::messaging::types::{ForegroundRequest, WorkerCommand, WorkerEvent};
use crate::domains::queue::{UploadItem, UploadQueueRepository};
use crate::errors::{ServiceError, UploadError};

/// Tunable worker parameters
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Periodic queue poll
    pub poll_interval: Duration,
    /// Simultaneous transfers per processing cycle
    pub max_concurrent_uploads: usize,
    /// Failed attempts before an item is terminal
    pub max_retries: i32,
    /// How long to wait for the foreground to supply upload credentials
    pub config_timeout: Duration,
    /// Base unit for retry backoff; the nth retry waits base * 2^n
    pub backoff_base: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_concurrent_uploads: 3,
            max_retries: 3,
            config_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Backoff before the nth automatic retry: base * 2^n, which is 2s, 4s, 8s
/// with the default one second base.
pub fn backoff_delay(base: Duration, retry_count: i32) -> Duration {
    let exponent = retry_count.clamp(1, 6) as u32;
    base * 2u32.pow(exponent)
}

/// Background worker for processing the upload queue
pub struct UploadWorker {
    repo: Arc<dyn UploadQueueRepository>,
    client: Arc<dyn StorageUploadClient>,
    settings: WorkerSettings,
    command_rx: Option<mpsc::Receiver<WorkerCommand>>,
    command_tx: mpsc::Sender<WorkerCommand>,
    event_tx: broadcast::Sender<WorkerEvent>,
    request_tx: mpsc::Sender<ForegroundRequest>,
    active_jobs: Arc<tokio::sync::Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl UploadWorker {
    pub fn new(
        repo: Arc<dyn UploadQueueRepository>,
        client: Arc<dyn StorageUploadClient>,
        command_rx: mpsc::Receiver<WorkerCommand>,
        command_tx: mpsc::Sender<WorkerCommand>,
        event_tx: broadcast::Sender<WorkerEvent>,
        request_tx: mpsc::Sender<ForegroundRequest>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            repo,
            client,
            settings,
            command_rx: Some(command_rx),
            command_tx,
            event_tx,
            request_tx,
            active_jobs: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Start the worker task. The returned handle resolves after a
    /// `Shutdown` command or when every command sender is dropped.
    pub fn start(mut self) -> JoinHandle<()> {
        let mut receiver = self
            .command_rx
            .take()
            .expect("command receiver should be available");

        tokio::spawn(async move {
            self.run(&mut receiver).await;
            log::info!("upload worker shut down");
        })
    }

    async fn run(&self, receiver: &mut mpsc::Receiver<WorkerCommand>) {
        let mut shutdown_reply: Option<oneshot::Sender<()>> = None;

        log::info!(
            "starting upload worker (max {} concurrent, poll every {:?})",
            self.settings.max_concurrent_uploads,
            self.settings.poll_interval
        );

        // Items a previous session left in `uploading` would otherwise
        // never be claimed again.
        match self.repo.reclaim_interrupted().await {
            Ok(0) => {}
            Ok(count) => log::info!("requeued {} upload(s) interrupted last session", count),
            Err(e) => log::error!("failed to requeue interrupted uploads: {}", e),
        }

        let mut interval = tokio::time::interval(self.settings.poll_interval);

        loop {
            tokio::select! {
                command = receiver.recv() => {
                    match command {
                        Some(WorkerCommand::EnqueueItem { item, reply }) => {
                            let result = self
                                .repo
                                .enqueue(item)
                                .await
                                .map(|stored| stored.id)
                                .map_err(ServiceError::from);
                            let _ = reply.send(result);
                            self.process_cycle().await;
                        }
                        Some(WorkerCommand::ProcessQueueNow) => {
                            self.process_cycle().await;
                        }
                        Some(WorkerCommand::GetQueueStatus { reply }) => {
                            let status = self
                                .repo
                                .queue_status()
                                .await
                                .map_err(ServiceError::from);
                            let _ = reply.send(status);
                        }
                        Some(WorkerCommand::RetryItem { item_id, reply }) => {
                            let result = self
                                .repo
                                .retry_item(item_id)
                                .await
                                .map_err(ServiceError::from);
                            let _ = reply.send(result);
                            self.process_cycle().await;
                        }
                        Some(WorkerCommand::ClearCompleted { reply }) => {
                            let result = self
                                .repo
                                .clear_completed()
                                .await
                                .map_err(ServiceError::from);
                            let _ = reply.send(result);
                        }
                        Some(WorkerCommand::NetworkReconnected) => {
                            log::info!("network reconnected, draining queue");
                            self.process_cycle().await;
                        }
                        Some(WorkerCommand::Shutdown { reply }) => {
                            shutdown_reply = Some(reply);
                            break;
                        }
                        None => {
                            log::debug!("command channel closed, stopping worker");
                            break;
                        }
                    }
                }

                _ = interval.tick() => {
                    self.process_cycle().await;
                }
            }
        }

        // Abort whatever is still running; the queue store keeps the items,
        // and the next session's startup reclaim requeues them.
        let mut jobs = self.active_jobs.lock().await;
        for (item_id, handle) in jobs.drain() {
            log::debug!("aborting in-flight upload for item {}", item_id);
            handle.abort();
        }
        drop(jobs);

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    /// One processing cycle: reap finished jobs, then claim pending items
    /// until the concurrency cap is reached.
    async fn process_cycle(&self) {
        {
            let mut jobs = self.active_jobs.lock().await;
            jobs.retain(|_, handle| !handle.is_finished());
        }

        loop {
            {
                let jobs = self.active_jobs.lock().await;
                if jobs.len() >= self.settings.max_concurrent_uploads {
                    break;
                }
            }

            match self.repo.claim_next_pending().await {
                Ok(Some(item)) => {
                    log::debug!(
                        "claimed item {} (attempt {}, {} bytes)",
                        item.id,
                        item.retry_count + 1,
                        item.payload.len()
                    );
                    let item_id = item.id;
                    let handle = self.spawn_attempt(item);
                    self.active_jobs.lock().await.insert(item_id, handle);
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("failed to claim next pending item: {}", e);
                    break;
                }
            }
        }

        if self.event_tx.receiver_count() > 0 {
            if let Ok(status) = self.repo.queue_status().await {
                let _ = self
                    .event_tx
                    .send(WorkerEvent::QueueStatusChanged { status });
            }
        }
    }

    fn spawn_attempt(&self, item: UploadItem) -> JoinHandle<()> {
        let repo = Arc::clone(&self.repo);
        let client = Arc::clone(&self.client);
        let event_tx = self.event_tx.clone();
        let request_tx = self.request_tx.clone();
        let command_tx = self.command_tx.clone();
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let outcome = attempt_upload(client.as_ref(), &request_tx, &settings, &item).await;

            match outcome {
                Ok(asset) => {
                    // Hand the persistence obligation to the foreground
                    // before declaring success, so a listener that only
                    // watches completions never sees an unpersisted URL.
                    let _ = event_tx.send(WorkerEvent::PersistRemoteReference {
                        target_record_id: item.target_record_id,
                        target_field: item.target_field.clone(),
                        url: asset.url.clone(),
                    });

                    if let Err(e) = repo.mark_completed(item.id).await {
                        log::error!("failed to mark item {} completed: {}", item.id, e);
                    }

                    log::info!("item {} uploaded to {}", item.id, asset.url);
                    let _ = event_tx.send(WorkerEvent::UploadCompleted {
                        item_id: item.id,
                        url: asset.url,
                        target_record_id: item.target_record_id,
                        target_field: item.target_field.clone(),
                    });
                }
                Err(error) => {
                    handle_failure(
                        repo, event_tx, command_tx, &settings, item.id, error,
                    )
                    .await;
                }
            }
        })
    }
}

async fn attempt_upload(
    client: &dyn StorageUploadClient,
    request_tx: &mpsc::Sender<ForegroundRequest>,
    settings: &WorkerSettings,
    item: &UploadItem,
) -> Result<RemoteAsset, UploadError> {
    // The worker holds no credentials of its own
    let config = request_upload_config(request_tx, settings.config_timeout).await?;

    let now = Utc::now();
    let folder = destination_folder(&config.category, now);
    let file_name = generate_file_name(&item.file_name, now);

    client
        .upload(
            &config,
            &folder,
            &file_name,
            &item.content_type,
            item.payload.clone(),
        )
        .await
}

async fn handle_failure(
    repo: Arc<dyn UploadQueueRepository>,
    event_tx: broadcast::Sender<WorkerEvent>,
    command_tx: mpsc::Sender<WorkerCommand>,
    settings: &WorkerSettings,
    item_id: Uuid,
    error: UploadError,
) {
    let retry_count = match repo.mark_error(item_id, &error.to_string()).await {
        Ok(count) => count,
        Err(e) => {
            log::error!("failed to record error for item {}: {}", item_id, e);
            return;
        }
    };

    // Non-retryable failures go terminal immediately: re-running a corrupt
    // payload or an oversized request cannot change the outcome.
    if error.is_retryable() && retry_count < settings.max_retries {
        let delay = backoff_delay(settings.backoff_base, retry_count);
        log::warn!(
            "item {} failed (attempt {}), retrying in {:?}: {}",
            item_id,
            retry_count,
            delay,
            error
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match repo.reset_for_retry(item_id, retry_count).await {
                // A manual retry or clear may have raced us; both are fine
                Ok(true) => {
                    let _ = command_tx.send(WorkerCommand::ProcessQueueNow).await;
                }
                Ok(false) => {}
                Err(e) => log::error!("failed to reset item {} for retry: {}", item_id, e),
            }
        });
    } else {
        log::error!(
            "item {} is terminal after {} attempt(s): {}",
            item_id,
            retry_count,
            error
        );
        let _ = event_tx.send(WorkerEvent::UploadError {
            item_id,
            error: error.to_string(),
        });
    }
}
