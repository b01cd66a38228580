//! Lifecycle status shared by both upload ledgers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an upload.
///
/// `PENDING -> IN_PROGRESS -> {COMPLETED | CANCELLED | FAILED}`. Stream uploads
/// never enter `FAILED`. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Cancelled | UploadStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Pending => "PENDING",
            UploadStatus::InProgress => "IN_PROGRESS",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Cancelled => "CANCELLED",
            UploadStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
