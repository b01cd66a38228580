//! Ledger row for a single-stream (tus) resumable upload.

use super::upload_status::UploadStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One resumable stream upload.
///
/// Invariants: `0 <= upload_offset <= upload_length`, and a `COMPLETED`
/// upload has `upload_offset == upload_length` with `final_path` set.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StreamUpload {
    /// Internal identifier, never exposed over HTTP.
    pub id: Uuid,

    /// Externally visible upload id (the last segment of `Location`).
    pub upload_id: String,

    /// Declared total length in bytes. Immutable once set.
    pub upload_length: i64,

    /// Bytes durably appended so far.
    pub upload_offset: i64,

    /// Raw `Upload-Metadata` header as sent by the client.
    pub metadata: Option<String>,

    /// Display filename from metadata (falls back to the upload id).
    pub filename: String,

    /// MIME type from metadata, if any.
    pub filetype: Option<String>,

    /// Growing temp file the stream is written into.
    pub temp_path: String,

    /// Durable location, set only on completion.
    pub final_path: Option<String>,

    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamUpload {
    pub fn remaining(&self) -> i64 {
        self.upload_length - self.upload_offset
    }

    pub fn is_complete(&self) -> bool {
        self.upload_offset == self.upload_length
    }
}

/// Read-only view returned by `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamUploadInfo {
    pub offset: i64,
    pub length: i64,
    pub status: UploadStatus,
}

impl From<&StreamUpload> for StreamUploadInfo {
    fn from(upload: &StreamUpload) -> Self {
        Self {
            offset: upload.upload_offset,
            length: upload.upload_length,
            status: upload.status,
        }
    }
}
