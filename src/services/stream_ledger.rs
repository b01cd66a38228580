//! Durable progress record for single-stream uploads.
//!
//! Status transitions are conditional writes: every update names the state
//! it expects to find, so two racing requests cannot both win.

use super::error::{UploadError, UploadResult};
use crate::models::{UploadStatus, stream_upload::StreamUpload};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;

const STREAM_COLUMNS: &str = "id, upload_id, upload_length, upload_offset, metadata, filename, \
     filetype, temp_path, final_path, status, created_at, updated_at";

#[derive(Clone)]
pub struct StreamLedger {
    db: Arc<SqlitePool>,
}

impl StreamLedger {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, upload: &StreamUpload) -> UploadResult<()> {
        sqlx::query(
            "INSERT INTO stream_uploads (
                id, upload_id, upload_length, upload_offset, metadata, filename,
                filetype, temp_path, final_path, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(upload.id)
        .bind(&upload.upload_id)
        .bind(upload.upload_length)
        .bind(upload.upload_offset)
        .bind(&upload.metadata)
        .bind(&upload.filename)
        .bind(&upload.filetype)
        .bind(&upload.temp_path)
        .bind(&upload.final_path)
        .bind(upload.status)
        .bind(upload.created_at)
        .bind(upload.updated_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Fetch by external upload id. Returns NotFound if missing.
    pub async fn fetch(&self, upload_id: &str) -> UploadResult<StreamUpload> {
        sqlx::query_as::<_, StreamUpload>(&format!(
            "SELECT {} FROM stream_uploads WHERE upload_id = ?",
            STREAM_COLUMNS
        ))
        .bind(upload_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| UploadError::NotFound(upload_id.to_string()))
    }

    /// Move the offset from `expected_offset` to `expected_offset + written`
    /// and mark the upload `IN_PROGRESS`.
    ///
    /// The write only lands if the stored offset still equals
    /// `expected_offset` and the upload is not terminal; otherwise the
    /// current row decides between `InvalidState` and `OffsetConflict`.
    pub async fn advance_offset(
        &self,
        upload_id: &str,
        expected_offset: i64,
        written: i64,
    ) -> UploadResult<i64> {
        let new_offset = expected_offset + written;
        let result = sqlx::query(
            "UPDATE stream_uploads
             SET upload_offset = ?, status = ?, updated_at = ?
             WHERE upload_id = ? AND upload_offset = ? AND status IN (?, ?)
               AND ? <= upload_length",
        )
        .bind(new_offset)
        .bind(UploadStatus::InProgress)
        .bind(Utc::now())
        .bind(upload_id)
        .bind(expected_offset)
        .bind(UploadStatus::Pending)
        .bind(UploadStatus::InProgress)
        .bind(new_offset)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(new_offset);
        }

        let current = self.fetch(upload_id).await?;
        if current.status.is_terminal() {
            Err(UploadError::invalid_state(upload_id, current.status))
        } else if current.upload_offset != expected_offset {
            Err(UploadError::OffsetConflict {
                expected: current.upload_offset,
                actual: expected_offset,
            })
        } else {
            Err(UploadError::InvalidArgument(format!(
                "offset {} exceeds upload length {}",
                new_offset, current.upload_length
            )))
        }
    }

    /// Mark `COMPLETED` with its final path, inside the caller's transaction.
    ///
    /// Returns false when the upload was already terminal.
    pub async fn mark_completed(
        conn: &mut SqliteConnection,
        upload_id: &str,
        final_path: &str,
    ) -> UploadResult<bool> {
        let result = sqlx::query(
            "UPDATE stream_uploads
             SET status = ?, final_path = ?, upload_offset = upload_length, updated_at = ?
             WHERE upload_id = ? AND status IN (?, ?)",
        )
        .bind(UploadStatus::Completed)
        .bind(final_path)
        .bind(Utc::now())
        .bind(upload_id)
        .bind(UploadStatus::Pending)
        .bind(UploadStatus::InProgress)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Mark `CANCELLED`. Returns false when the upload was already terminal.
    pub async fn mark_cancelled(&self, upload_id: &str) -> UploadResult<bool> {
        let result = sqlx::query(
            "UPDATE stream_uploads SET status = ?, updated_at = ?
             WHERE upload_id = ? AND status IN (?, ?)",
        )
        .bind(UploadStatus::Cancelled)
        .bind(Utc::now())
        .bind(upload_id)
        .bind(UploadStatus::Pending)
        .bind(UploadStatus::InProgress)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Every completed upload, for checking that final files exist.
    pub async fn completed(&self) -> UploadResult<Vec<StreamUpload>> {
        let rows = sqlx::query_as::<_, StreamUpload>(&format!(
            "SELECT {} FROM stream_uploads WHERE status = ? ORDER BY updated_at ASC",
            STREAM_COLUMNS
        ))
        .bind(UploadStatus::Completed)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }
}
