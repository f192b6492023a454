//! HTTP client for the remote storage service.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::types::{RemoteAsset, UploadConfig};
use crate::errors::UploadError;

/// Submits file bytes to the remote storage endpoint.
///
/// Errors carry the retryability taxonomy: transport problems and
/// non-success responses are `Network`, a payload the service permanently
/// rejects is `Processing`.
#[async_trait]
pub trait StorageUploadClient: Send + Sync {
    async fn upload(
        &self,
        config: &UploadConfig,
        folder: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<RemoteAsset, UploadError>;
}

/// Multipart implementation against the storage service API
pub struct HttpStorageUploadClient {
    client: Client,
}

impl HttpStorageUploadClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self { client }
    }
}

impl Default for HttpStorageUploadClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

#[async_trait]
impl StorageUploadClient for HttpStorageUploadClient {
    async fn upload(
        &self,
        config: &UploadConfig,
        folder: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<RemoteAsset, UploadError> {
        log::debug!("uploading {} ({} bytes) to {}", file_name, bytes.len(), folder);

        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| UploadError::Processing(format!("Invalid MIME type for upload: {}", e)))?;

        let form = Form::new()
            .part("file", part)
            .text("fileName", file_name.to_string())
            .text("folder", folder.to_string())
            .text("publicKey", config.public_key.clone())
            .text("signature", config.signature.clone())
            .text("expire", config.expire.to_string())
            .text("token", config.token.clone());

        let response = self
            .client
            .post(&config.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Network(format!("Failed to submit upload: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let upload_response = response
                .json::<UploadResponse>()
                .await
                .map_err(|e| UploadError::Network(format!("Failed to parse upload response: {}", e)))?;

            Ok(RemoteAsset {
                url: upload_response.url,
            })
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to get error details".to_string());

            // 4xx means the request itself can never succeed as formed
            if status.is_client_error() {
                Err(UploadError::Processing(format!(
                    "Storage service rejected upload ({}): {}",
                    status, error_text
                )))
            } else {
                Err(UploadError::Network(format!(
                    "Storage service returned {}: {}",
                    status, error_text
                )))
            }
        }
    }
}
