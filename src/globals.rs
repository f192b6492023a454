//! Global runtime state and subsystem wiring.
//!
//! Embedders call [`initialize`] once with the database path, environment
//! hints, and a credential provider; everything else (migrations, bridge
//! channels, worker, scheduler) is wired here.

use lazy_static::lazy_static;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::db_migration;
use crate::domains::device::{EnvironmentHints, HeuristicCapabilityDetector};
use crate::domains::messaging::bridge::{bridge, spawn_config_responder, UploadConfigProvider};
use crate::domains::messaging::types::WorkerCommand;
use crate::domains::queue::SqliteUploadQueueRepository;
use crate::domains::upload::{
    HttpStorageUploadClient, LivenessScheduler, UploadManager, UploadWorker, WorkerSettings,
};
use crate::errors::{ServiceError, ServiceResult};

lazy_static! {
    static ref DB_POOL: Mutex<Option<SqlitePool>> = Mutex::new(None);
    static ref UPLOAD_MANAGER: Mutex<Option<Arc<UploadManager>>> = Mutex::new(None);
    static ref COMMAND_SENDER: Mutex<Option<mpsc::Sender<WorkerCommand>>> = Mutex::new(None);
    static ref BACKGROUND_TASKS: Mutex<Vec<JoinHandle<()>>> = Mutex::new(Vec::new());
    static ref SCHEDULER: Mutex<Option<Arc<LivenessScheduler>>> = Mutex::new(None);
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn lock_poisoned() -> ServiceError {
    ServiceError::ServiceUnavailable("global state lock poisoned".to_string())
}

/// Initialize the subsystem: open the database, run migrations, and start
/// the worker, config responder and liveness scheduler. Idempotent; a
/// failed attempt leaves the subsystem uninitialized and can be retried.
pub async fn initialize(
    db_path: &str,
    hints: EnvironmentHints,
    provider: Arc<dyn UploadConfigProvider>,
) -> ServiceResult<()> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        log::warn!("initialize called more than once, ignoring");
        return Ok(());
    }

    let result = initialize_inner(db_path, hints, provider).await;
    if result.is_err() {
        INITIALIZED.store(false, Ordering::SeqCst);
    }
    result
}

async fn initialize_inner(
    db_path: &str,
    hints: EnvironmentHints,
    provider: Arc<dyn UploadConfigProvider>,
) -> ServiceResult<()> {
    log::info!("initializing upload subsystem with database at {}", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite://{}?mode=rwc", db_path))
        .await
        .map_err(|e| ServiceError::Configuration(format!("failed to open database: {}", e)))?;

    db_migration::run_migrations(&pool)
        .await
        .map_err(|e| ServiceError::Configuration(format!("migration failed: {}", e)))?;

    let repo = Arc::new(SqliteUploadQueueRepository::new(pool.clone()));
    let storage_client = Arc::new(HttpStorageUploadClient::new());
    let channels = bridge();

    let worker = UploadWorker::new(
        repo.clone(),
        storage_client.clone(),
        channels.command_rx,
        channels.command_tx.clone(),
        channels.event_tx.clone(),
        channels.request_tx.clone(),
        WorkerSettings::default(),
    );
    let worker_handle = worker.start();

    let responder_handle = spawn_config_responder(channels.request_rx, provider.clone());

    let scheduler = Arc::new(LivenessScheduler::new(
        repo.clone(),
        channels.command_tx.clone(),
    ));
    let scheduler_handle = scheduler.clone().start();

    let manager = Arc::new(UploadManager::new(
        Arc::new(HeuristicCapabilityDetector::new()),
        hints,
        channels.command_tx.clone(),
        channels.event_tx.clone(),
        storage_client,
        provider,
    ));

    *DB_POOL.lock().map_err(|_| lock_poisoned())? = Some(pool);
    *UPLOAD_MANAGER.lock().map_err(|_| lock_poisoned())? = Some(manager);
    *COMMAND_SENDER.lock().map_err(|_| lock_poisoned())? = Some(channels.command_tx);
    *SCHEDULER.lock().map_err(|_| lock_poisoned())? = Some(scheduler);
    BACKGROUND_TASKS
        .lock()
        .map_err(|_| lock_poisoned())?
        .extend([worker_handle, responder_handle, scheduler_handle]);

    Ok(())
}

/// Get the upload manager. Errors until [`initialize`] has completed.
pub fn upload_manager() -> ServiceResult<Arc<UploadManager>> {
    UPLOAD_MANAGER
        .lock()
        .map_err(|_| lock_poisoned())?
        .clone()
        .ok_or_else(|| {
            ServiceError::ServiceUnavailable("upload subsystem not initialized".to_string())
        })
}

/// Get the database pool. Errors until [`initialize`] has completed.
pub fn db_pool() -> ServiceResult<SqlitePool> {
    DB_POOL
        .lock()
        .map_err(|_| lock_poisoned())?
        .clone()
        .ok_or_else(|| {
            ServiceError::ServiceUnavailable("upload subsystem not initialized".to_string())
        })
}

/// Stop the worker, scheduler and responder and release global state.
/// Queued items stay in the database for the next session.
pub async fn shutdown() -> ServiceResult<()> {
    let sender = COMMAND_SENDER.lock().map_err(|_| lock_poisoned())?.take();
    if let Some(sender) = sender {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        if sender
            .send(WorkerCommand::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    let scheduler = SCHEDULER.lock().map_err(|_| lock_poisoned())?.take();
    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }

    let tasks: Vec<JoinHandle<()>> = BACKGROUND_TASKS
        .lock()
        .map_err(|_| lock_poisoned())?
        .drain(..)
        .collect();
    for task in tasks {
        task.abort();
    }

    *UPLOAD_MANAGER.lock().map_err(|_| lock_poisoned())? = None;
    let pool = DB_POOL.lock().map_err(|_| lock_poisoned())?.take();
    if let Some(pool) = pool {
        pool.close().await;
    }

    INITIALIZED.store(false, Ordering::SeqCst);
    log::info!("upload subsystem shut down");
    Ok(())
}
