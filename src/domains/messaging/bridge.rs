//! Channel plumbing between foreground contexts and the background worker.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::types::{ForegroundRequest, WorkerCommand, WorkerEvent};
use crate::domains::upload::types::UploadConfig;
use crate::errors::{ServiceResult, UploadError};

/// Default capacity for the command and request channels
const CHANNEL_BUFFER: usize = 100;

/// Broadcast capacity for worker events; late foreground subscribers only
/// care about recent notifications.
const EVENT_BUFFER: usize = 64;

/// Supplies transient upload credentials/configuration. Implemented by the
/// foreground application, which holds the privileged session.
#[async_trait]
pub trait UploadConfigProvider: Send + Sync {
    async fn upload_config(&self) -> ServiceResult<UploadConfig>;
}

/// All channel endpoints connecting foreground contexts and the worker.
///
/// The worker side takes `command_rx`, `request_tx` and a clone of
/// `event_tx`; foreground contexts keep `command_tx`, subscribe on
/// `event_tx`, and answer `request_rx`.
pub struct BridgeChannels {
    pub command_tx: mpsc::Sender<WorkerCommand>,
    pub command_rx: mpsc::Receiver<WorkerCommand>,
    pub event_tx: broadcast::Sender<WorkerEvent>,
    pub request_tx: mpsc::Sender<ForegroundRequest>,
    pub request_rx: mpsc::Receiver<ForegroundRequest>,
}

/// Create a fresh set of bridge channels.
pub fn bridge() -> BridgeChannels {
    let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let (request_tx, request_rx) = mpsc::channel(CHANNEL_BUFFER);

    BridgeChannels {
        command_tx,
        command_rx,
        event_tx,
        request_tx,
        request_rx,
    }
}

/// Spawn the foreground-side responder that answers worker requests with
/// credentials from the provider.
pub fn spawn_config_responder(
    mut request_rx: mpsc::Receiver<ForegroundRequest>,
    provider: Arc<dyn UploadConfigProvider>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = request_rx.recv().await {
            match request {
                ForegroundRequest::UploadConfig { reply } => {
                    let config = provider.upload_config().await;
                    // A dropped reply just means the worker timed out first
                    let _ = reply.send(config);
                }
            }
        }
        log::debug!("config responder shutting down, request channel closed");
    })
}

/// Request upload configuration over the bridge, waiting at most `timeout`.
///
/// This is the request/response-with-timeout pattern as a cancellable
/// future: when the timeout elapses the reply channel is simply dropped, so
/// there is no listener to leak and a late response is discarded.
pub async fn request_upload_config(
    request_tx: &mpsc::Sender<ForegroundRequest>,
    timeout: Duration,
) -> Result<UploadConfig, UploadError> {
    let (reply_tx, reply_rx) = oneshot::channel();

    request_tx
        .send(ForegroundRequest::UploadConfig { reply: reply_tx })
        .await
        .map_err(|_| {
            UploadError::ConfigUnavailable("no foreground context is connected".to_string())
        })?;

    match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(Ok(config))) => Ok(config),
        Ok(Ok(Err(e))) => Err(UploadError::ConfigUnavailable(e.to_string())),
        Ok(Err(_)) => Err(UploadError::ConfigUnavailable(
            "foreground dropped the request".to_string(),
        )),
        Err(_) => Err(UploadError::ConfigUnavailable(format!(
            "no response within {:?}",
            timeout
        ))),
    }
}

/// Provider returning a fixed configuration. Useful for tests and for
/// embedders whose credentials are issued out of band.
pub struct StaticConfigProvider {
    config: UploadConfig,
}

impl StaticConfigProvider {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl UploadConfigProvider for StaticConfigProvider {
    async fn upload_config(&self) -> ServiceResult<UploadConfig> {
        Ok(self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> UploadConfig {
        UploadConfig {
            endpoint: "https://storage.example.com/upload".to_string(),
            public_key: "pk_test".to_string(),
            signature: "sig".to_string(),
            expire: 1_900_000_000,
            token: "tok".to_string(),
            category: "inspections".to_string(),
        }
    }

    #[tokio::test]
    async fn test_config_roundtrip() {
        let channels = bridge();
        let provider = Arc::new(StaticConfigProvider::new(test_config()));
        let responder = spawn_config_responder(channels.request_rx, provider);

        let config = request_upload_config(&channels.request_tx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(config.public_key, "pk_test");

        drop(channels.request_tx);
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_request_times_out_without_responder() {
        let channels = bridge();
        // Nobody reads request_rx, so the 5s timeout must fire
        let _held_open = channels.request_rx;

        let err = request_upload_config(&channels.request_tx, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ConfigUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_closed_bridge_reports_config_unavailable() {
        let channels = bridge();
        drop(channels.request_rx);

        let err = request_upload_config(&channels.request_tx, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ConfigUnavailable(_)));
    }

    #[tokio::test]
    async fn test_events_reach_every_subscriber() {
        let channels = bridge();
        let mut rx_a = channels.event_tx.subscribe();
        let mut rx_b = channels.event_tx.subscribe();

        channels
            .event_tx
            .send(WorkerEvent::UploadError {
                item_id: uuid::Uuid::new_v4(),
                error: "boom".to_string(),
            })
            .unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await.unwrap() {
                WorkerEvent::UploadError { error, .. } => assert_eq!(error, "boom"),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
}
