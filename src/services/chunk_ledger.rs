//! Durable progress record for chunk-indexed uploads: one session row plus
//! one row per received chunk.

use super::error::{UploadError, UploadResult};
use crate::models::{
    UploadStatus,
    chunk_upload::{ChunkUpload, UploadChunk},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

const UPLOAD_COLUMNS: &str = "id, filename, content_type, total_size, chunk_size, total_chunks, \
     final_path, status, created_at, updated_at";

#[derive(Clone)]
pub struct ChunkLedger {
    db: Arc<SqlitePool>,
}

impl ChunkLedger {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn insert_upload(&self, upload: &ChunkUpload) -> UploadResult<()> {
        sqlx::query(
            "INSERT INTO chunk_uploads (
                id, filename, content_type, total_size, chunk_size, total_chunks,
                final_path, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(upload.id)
        .bind(&upload.filename)
        .bind(&upload.content_type)
        .bind(upload.total_size)
        .bind(upload.chunk_size)
        .bind(upload.total_chunks)
        .bind(&upload.final_path)
        .bind(upload.status)
        .bind(upload.created_at)
        .bind(upload.updated_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn fetch_upload(&self, id: Uuid) -> UploadResult<ChunkUpload> {
        sqlx::query_as::<_, ChunkUpload>(&format!(
            "SELECT {} FROM chunk_uploads WHERE id = ?",
            UPLOAD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| UploadError::NotFound(id.to_string()))
    }

    pub async fn chunk_exists(&self, id: Uuid, idx: i64) -> UploadResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM upload_chunks WHERE upload_id = ? AND idx = ?")
                .bind(id)
                .bind(idx)
                .fetch_optional(&*self.db)
                .await?;
        Ok(found.is_some())
    }

    /// Record a chunk unless one already exists for its index.
    ///
    /// Returns true when this call created the row; false means another
    /// writer got there first and nothing changed.
    pub async fn insert_chunk(&self, chunk: &UploadChunk) -> UploadResult<bool> {
        let result = sqlx::query(
            "INSERT INTO upload_chunks (upload_id, idx, size_bytes, checksum, stored_path, received_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(upload_id, idx) DO NOTHING",
        )
        .bind(chunk.upload_id)
        .bind(chunk.idx)
        .bind(chunk.size_bytes)
        .bind(&chunk.checksum)
        .bind(&chunk.stored_path)
        .bind(chunk.received_at)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_chunk(&self, id: Uuid, idx: i64) -> UploadResult<()> {
        sqlx::query("DELETE FROM upload_chunks WHERE upload_id = ? AND idx = ?")
            .bind(id)
            .bind(idx)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn chunks(&self, id: Uuid) -> UploadResult<Vec<UploadChunk>> {
        let rows = sqlx::query_as::<_, UploadChunk>(
            "SELECT upload_id, idx, size_bytes, checksum, stored_path, received_at
             FROM upload_chunks WHERE upload_id = ? ORDER BY idx ASC",
        )
        .bind(id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Received indices, ascending.
    pub async fn received_indexes(&self, id: Uuid) -> UploadResult<Vec<i64>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT idx FROM upload_chunks WHERE upload_id = ? ORDER BY idx ASC",
        )
        .bind(id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    pub async fn delete_chunks(&self, id: Uuid) -> UploadResult<u64> {
        let result = sqlx::query("DELETE FROM upload_chunks WHERE upload_id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// `PENDING -> IN_PROGRESS`. A no-op for any other status.
    pub async fn mark_in_progress(&self, id: Uuid) -> UploadResult<()> {
        sqlx::query("UPDATE chunk_uploads SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(UploadStatus::InProgress)
            .bind(Utc::now())
            .bind(id)
            .bind(UploadStatus::Pending)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Move a non-terminal upload into terminal status `to`, optionally
    /// recording its final path. Returns false if the upload was already
    /// terminal.
    pub async fn finish(
        &self,
        id: Uuid,
        to: UploadStatus,
        final_path: Option<&str>,
    ) -> UploadResult<bool> {
        debug_assert!(to.is_terminal());
        let result = sqlx::query(
            "UPDATE chunk_uploads
             SET status = ?, final_path = COALESCE(?, final_path), updated_at = ?
             WHERE id = ? AND status IN (?, ?)",
        )
        .bind(to)
        .bind(final_path)
        .bind(Utc::now())
        .bind(id)
        .bind(UploadStatus::Pending)
        .bind(UploadStatus::InProgress)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::ledger_pool;
    use crate::models::chunk_upload::total_chunks_for;
    use tempfile::TempDir;

    fn upload(total_size: i64, chunk_size: i64) -> ChunkUpload {
        let now = Utc::now();
        ChunkUpload {
            id: Uuid::new_v4(),
            filename: "movie.mp4".into(),
            content_type: Some("video/mp4".into()),
            total_size,
            chunk_size,
            total_chunks: total_chunks_for(total_size, chunk_size),
            final_path: None,
            status: UploadStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn chunk(upload_id: Uuid, idx: i64, size: i64) -> UploadChunk {
        UploadChunk {
            upload_id,
            idx,
            size_bytes: size,
            checksum: None,
            stored_path: format!("/tmp/chunk-{}", idx),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_insert_for_an_index_is_ignored() {
        let dir = TempDir::new().unwrap();
        let ledger = ChunkLedger::new(ledger_pool(&dir).await);
        let up = upload(1000, 400);
        ledger.insert_upload(&up).await.unwrap();

        assert!(ledger.insert_chunk(&chunk(up.id, 1, 400)).await.unwrap());
        assert!(!ledger.insert_chunk(&chunk(up.id, 1, 17)).await.unwrap());

        let rows = ledger.chunks(up.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size_bytes, 400);
        assert!(ledger.chunk_exists(up.id, 1).await.unwrap());
        assert!(!ledger.chunk_exists(up.id, 0).await.unwrap());
    }

    #[tokio::test]
    async fn received_indexes_are_sorted() {
        let dir = TempDir::new().unwrap();
        let ledger = ChunkLedger::new(ledger_pool(&dir).await);
        let up = upload(1000, 100);
        ledger.insert_upload(&up).await.unwrap();
        for idx in [7, 2, 5] {
            ledger.insert_chunk(&chunk(up.id, idx, 100)).await.unwrap();
        }
        assert_eq!(ledger.received_indexes(up.id).await.unwrap(), vec![2, 5, 7]);

        assert_eq!(ledger.delete_chunks(up.id).await.unwrap(), 3);
        assert!(ledger.received_indexes(up.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finish_only_moves_non_terminal_uploads() {
        let dir = TempDir::new().unwrap();
        let ledger = ChunkLedger::new(ledger_pool(&dir).await);
        let up = upload(10, 10);
        ledger.insert_upload(&up).await.unwrap();

        ledger.mark_in_progress(up.id).await.unwrap();
        assert_eq!(
            ledger.fetch_upload(up.id).await.unwrap().status,
            UploadStatus::InProgress
        );

        assert!(
            ledger
                .finish(up.id, UploadStatus::Completed, Some("/final/movie.mp4"))
                .await
                .unwrap()
        );
        assert!(
            !ledger
                .finish(up.id, UploadStatus::Cancelled, None)
                .await
                .unwrap()
        );

        let row = ledger.fetch_upload(up.id).await.unwrap();
        assert_eq!(row.status, UploadStatus::Completed);
        assert_eq!(row.final_path.as_deref(), Some("/final/movie.mp4"));

        // Terminal uploads stay put.
        ledger.mark_in_progress(up.id).await.unwrap();
        assert_eq!(
            ledger.fetch_upload(up.id).await.unwrap().status,
            UploadStatus::Completed
        );
    }
}
