//! Keeps the worker making progress while work is outstanding.
//!
//! Two cooperating loops. The watchdog wakes every 60 seconds, reads the
//! queue counters fresh from the store, and starts or stops the heartbeat
//! based on whether any item is pending or uploading. The heartbeat, while
//! running, nudges the worker with `ProcessQueueNow` every 25 seconds so a
//! queue survives even when no foreground context is around to trigger it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::domains::messaging::types::WorkerCommand;
use crate::domains::queue::UploadQueueRepository;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

pub struct LivenessScheduler {
    repo: Arc<dyn UploadQueueRepository>,
    command_tx: mpsc::Sender<WorkerCommand>,
    heartbeat_interval: Duration,
    watchdog_interval: Duration,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl LivenessScheduler {
    pub fn new(
        repo: Arc<dyn UploadQueueRepository>,
        command_tx: mpsc::Sender<WorkerCommand>,
    ) -> Self {
        Self::with_intervals(repo, command_tx, HEARTBEAT_INTERVAL, WATCHDOG_INTERVAL)
    }

    pub fn with_intervals(
        repo: Arc<dyn UploadQueueRepository>,
        command_tx: mpsc::Sender<WorkerCommand>,
        heartbeat_interval: Duration,
        watchdog_interval: Duration,
    ) -> Self {
        Self {
            repo,
            command_tx,
            heartbeat_interval,
            watchdog_interval,
            heartbeat: Mutex::new(None),
        }
    }

    /// Start the watchdog loop. Abort the returned handle (and call
    /// [`stop`](Self::stop)) to shut the scheduler down.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        log::info!(
            "starting liveness scheduler (watchdog {:?}, heartbeat {:?})",
            self.watchdog_interval,
            self.heartbeat_interval
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.watchdog_interval);
            loop {
                interval.tick().await;
                self.evaluate().await;
            }
        })
    }

    /// One watchdog pass. The status is re-read from the store every time,
    /// never cached across ticks.
    async fn evaluate(&self) {
        let status = match self.repo.queue_status().await {
            Ok(status) => status,
            Err(e) => {
                log::error!("watchdog failed to read queue status: {}", e);
                return;
            }
        };

        let mut heartbeat = self.heartbeat.lock().await;
        if heartbeat.as_ref().is_some_and(|h| h.is_finished()) {
            *heartbeat = None;
        }

        if status.in_flight() > 0 {
            if heartbeat.is_none() {
                log::debug!(
                    "{} item(s) outstanding, starting heartbeat",
                    status.in_flight()
                );
                let command_tx = self.command_tx.clone();
                let period = self.heartbeat_interval;
                *heartbeat = Some(tokio::spawn(async move {
                    let mut interval = tokio::time::interval(period);
                    loop {
                        interval.tick().await;
                        if command_tx.send(WorkerCommand::ProcessQueueNow).await.is_err() {
                            break;
                        }
                    }
                }));
            }
        } else if let Some(handle) = heartbeat.take() {
            log::debug!("queue drained, stopping heartbeat");
            handle.abort();
        }
    }

    /// Abort the heartbeat, if running.
    pub async fn stop(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_migration;
    use crate::domains::queue::{NewUploadItem, SqliteUploadQueueRepository, UploadPriority};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    async fn repo() -> Arc<SqliteUploadQueueRepository> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db_migration::run_migrations(&pool).await.unwrap();
        Arc::new(SqliteUploadQueueRepository::new(pool))
    }

    fn pending_item() -> NewUploadItem {
        NewUploadItem {
            payload: vec![1, 2, 3],
            target_record_id: Uuid::new_v4(),
            target_field: "photo1".to_string(),
            file_name: "evidence.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            priority: UploadPriority::Normal,
        }
    }

    // Millisecond-scale intervals so the loops run in real time
    const TEST_HEARTBEAT: Duration = Duration::from_millis(30);
    const TEST_WATCHDOG: Duration = Duration::from_millis(80);

    fn count_nudges(mut rx: mpsc::Receiver<WorkerCommand>) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                if matches!(command, WorkerCommand::ProcessQueueNow) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        count
    }

    async fn wait_for_nudge(nudges: &Arc<AtomicUsize>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while nudges.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scheduler never nudged the worker");
    }

    #[tokio::test]
    async fn test_pending_work_is_nudged_without_foreground_triggers() {
        let repo = repo().await;
        repo.enqueue(pending_item()).await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        let nudges = count_nudges(rx);

        let scheduler = Arc::new(LivenessScheduler::with_intervals(
            repo,
            tx,
            TEST_HEARTBEAT,
            TEST_WATCHDOG,
        ));
        let watchdog = scheduler.clone().start();

        // The first watchdog pass starts the heartbeat, whose own first
        // tick is immediate, with no foreground command involved.
        wait_for_nudge(&nudges).await;

        watchdog.abort();
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_heartbeat_stops_once_queue_is_drained() {
        let repo = repo().await;
        repo.enqueue(pending_item()).await.unwrap();

        let (tx, rx) = mpsc::channel(64);
        let nudges = count_nudges(rx);

        let scheduler = Arc::new(LivenessScheduler::with_intervals(
            repo.clone(),
            tx,
            TEST_HEARTBEAT,
            TEST_WATCHDOG,
        ));
        let watchdog = scheduler.clone().start();

        wait_for_nudge(&nudges).await;

        // Drain the queue, then give the watchdog a few passes to notice.
        let item = repo.claim_next_pending().await.unwrap().unwrap();
        repo.mark_completed(item.id).await.unwrap();
        tokio::time::sleep(TEST_WATCHDOG * 5).await;

        let settled = nudges.load(Ordering::SeqCst);
        tokio::time::sleep(TEST_HEARTBEAT * 10).await;
        assert_eq!(nudges.load(Ordering::SeqCst), settled);

        watchdog.abort();
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_empty_queue_never_starts_the_heartbeat() {
        let repo = repo().await;

        let (tx, rx) = mpsc::channel(16);
        let nudges = count_nudges(rx);

        let scheduler = Arc::new(LivenessScheduler::with_intervals(
            repo,
            tx,
            TEST_HEARTBEAT,
            TEST_WATCHDOG,
        ));
        let watchdog = scheduler.clone().start();

        tokio::time::sleep(TEST_WATCHDOG * 5).await;
        assert_eq!(nudges.load(Ordering::SeqCst), 0);

        watchdog.abort();
        scheduler.stop().await;
    }
}
