//! Represents chunk-indexed upload sessions and their received chunks.

use super::upload_status::UploadStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A chunked upload session, initiated before sending indexed chunks.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ChunkUpload {
    /// Generated upload id (returned to client).
    pub id: Uuid,

    /// Sanitised target filename.
    pub filename: String,

    /// Declared content type.
    pub content_type: Option<String>,

    /// Declared total size in bytes.
    pub total_size: i64,

    /// Size of every chunk except possibly the last.
    pub chunk_size: i64,

    /// `ceil(total_size / chunk_size)`, fixed at creation.
    pub total_chunks: i64,

    /// Assembled file location, set once committed.
    pub final_path: Option<String>,

    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single received chunk. At most one per `(upload_id, idx)`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadChunk {
    /// Reference to parent upload session.
    pub upload_id: Uuid,

    /// Chunk index (0-based).
    pub idx: i64,

    /// Bytes actually received.
    pub size_bytes: i64,

    /// Caller-supplied checksum, stored as-is.
    pub checksum: Option<String>,

    /// Where the chunk file lives inside the session directory.
    pub stored_path: String,

    pub received_at: DateTime<Utc>,
}

/// Number of chunks needed to carry `total_size` bytes. Both sizes must be
/// positive.
pub fn total_chunks_for(total_size: i64, chunk_size: i64) -> i64 {
    total_size / chunk_size + i64::from(total_size % chunk_size != 0)
}
