//! Type definitions for the durable upload queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{DomainError, ValidationError};

/// Lifecycle status of a queued upload.
///
/// Transitions are `pending -> uploading -> {completed | error}`, with
/// `error -> pending` permitted only through the bounded automatic retry
/// path or an explicit manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Error,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
        }
    }
}

impl FromStr for UploadStatus {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(UploadStatus::Pending),
            "uploading" => Ok(UploadStatus::Uploading),
            "completed" => Ok(UploadStatus::Completed),
            "error" => Ok(UploadStatus::Error),
            _ => Err(DomainError::Validation(ValidationError::custom(&format!(
                "Invalid upload status: {}",
                s
            )))),
        }
    }
}

impl From<UploadStatus> for String {
    fn from(status: UploadStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Priority for queued uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord)]
pub enum UploadPriority {
    High = 10,
    Normal = 5,
    Low = 1,
}

impl From<i32> for UploadPriority {
    fn from(value: i32) -> Self {
        match value {
            v if v >= 8 => UploadPriority::High,
            v if v >= 3 => UploadPriority::Normal,
            _ => UploadPriority::Low,
        }
    }
}

impl From<UploadPriority> for i32 {
    fn from(priority: UploadPriority) -> Self {
        match priority {
            UploadPriority::High => 10,
            UploadPriority::Normal => 5,
            UploadPriority::Low => 1,
        }
    }
}

/// A persisted entry in the upload queue
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: Uuid,
    pub payload: Vec<u8>,
    pub target_record_id: Uuid,
    pub target_field: String,
    pub file_name: String,
    pub content_type: String,
    pub status: UploadStatus,
    pub retry_count: i32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Payload handed over by the foreground when enqueueing a file
#[derive(Debug, Clone)]
pub struct NewUploadItem {
    pub payload: Vec<u8>,
    pub target_record_id: Uuid,
    pub target_field: String,
    pub file_name: String,
    pub content_type: String,
    pub priority: UploadPriority,
}

/// Derived per-status counts over the queue.
///
/// Recomputed on demand by aggregate query; used for observability and
/// liveness decisions only, never for authoritative control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: i64,
    pub uploading: i64,
    pub completed: i64,
    pub error: i64,
    pub total: i64,
}

impl QueueStatus {
    /// Items that still need worker attention.
    pub fn in_flight(&self) -> i64 {
        self.pending + self.uploading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Uploading,
            UploadStatus::Completed,
            UploadStatus::Error,
        ] {
            assert_eq!(UploadStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(UploadStatus::from_str("stalled").is_err());
    }

    #[test]
    fn test_priority_conversions() {
        assert_eq!(UploadPriority::from(10), UploadPriority::High);
        assert_eq!(UploadPriority::from(5), UploadPriority::Normal);
        assert_eq!(UploadPriority::from(0), UploadPriority::Low);
        assert_eq!(i32::from(UploadPriority::Normal), 5);
    }

    #[test]
    fn test_in_flight_counts_pending_and_uploading() {
        let status = QueueStatus {
            pending: 2,
            uploading: 1,
            completed: 7,
            error: 1,
            total: 11,
        };
        assert_eq!(status.in_flight(), 3);
    }
}
