//! Type definitions shared across the upload domain.

use chrono::{DateTime, Datelike, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Short-lived signed credentials plus endpoint data needed for one upload.
/// Issued by the foreground on request; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub endpoint: String,
    pub public_key: String,
    pub signature: String,
    /// Unix timestamp after which the signature is rejected
    pub expire: i64,
    pub token: String,
    /// Top-level folder the destination path is rooted in
    pub category: String,
}

/// Reference to the stored asset returned by the storage service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub url: String,
}

/// Destination folder convention: `<category>/<year>-<month>`.
pub fn destination_folder(category: &str, now: DateTime<Utc>) -> String {
    format!("{}/{}-{:02}", category, now.year(), now.month())
}

/// Unique remote file name: timestamp, random suffix, original extension.
pub fn generate_file_name(original_name: &str, now: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();

    match original_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => {
            format!("{}_{}.{}", now.timestamp_millis(), suffix, ext.to_lowercase())
        }
        _ => format!("{}_{}", now.timestamp_millis(), suffix),
    }
}
