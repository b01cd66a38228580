//! Handoff of finalized uploads to downstream consumers.
//!
//! The finalizer depends only on [`TaskQueue`]; the shipped implementation
//! appends to a SQLite outbox table that workers drain in FIFO order per
//! queue name.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

pub const THUMBNAIL_QUEUE: &str = "thumbnail-queue";
pub const METADATA_QUEUE: &str = "metadata-queue";
pub const REMOTE_SYNC_QUEUE: &str = "remote-sync-queue";
pub const VIDEO_TRANSCODE_QUEUE: &str = "video-transcode-queue";

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append `payload` to `queue`. No ordering is promised across queues.
    async fn push(&self, queue: &str, payload: &str) -> Result<()>;
}

/// Outbox-table queue.
#[derive(Clone)]
pub struct SqliteTaskQueue {
    db: Arc<SqlitePool>,
}

impl SqliteTaskQueue {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Remove and return the oldest payload on `queue`, if any.
    pub async fn pop(&self, queue: &str) -> Result<Option<String>> {
        let payload = sqlx::query_scalar::<_, String>(
            "DELETE FROM task_outbox
             WHERE id = (SELECT id FROM task_outbox WHERE queue = ? ORDER BY id ASC LIMIT 1)
             RETURNING payload",
        )
        .bind(queue)
        .fetch_optional(&*self.db)
        .await?;
        Ok(payload)
    }

    pub async fn len(&self, queue: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM task_outbox WHERE queue = ?")
            .bind(queue)
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn push(&self, queue: &str, payload: &str) -> Result<()> {
        sqlx::query("INSERT INTO task_outbox (queue, payload, created_at) VALUES (?, ?, ?)")
            .bind(queue)
            .bind(payload)
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::ledger_pool;
    use tempfile::TempDir;

    #[tokio::test]
    async fn pop_is_fifo_per_queue() {
        let dir = TempDir::new().unwrap();
        let queue = SqliteTaskQueue::new(ledger_pool(&dir).await);

        queue.push(THUMBNAIL_QUEUE, "a").await.unwrap();
        queue.push(METADATA_QUEUE, "x").await.unwrap();
        queue.push(THUMBNAIL_QUEUE, "b").await.unwrap();

        assert_eq!(queue.len(THUMBNAIL_QUEUE).await.unwrap(), 2);
        assert_eq!(queue.pop(THUMBNAIL_QUEUE).await.unwrap().as_deref(), Some("a"));
        assert_eq!(queue.pop(THUMBNAIL_QUEUE).await.unwrap().as_deref(), Some("b"));
        assert_eq!(queue.pop(THUMBNAIL_QUEUE).await.unwrap(), None);
        assert_eq!(queue.pop(METADATA_QUEUE).await.unwrap().as_deref(), Some("x"));
    }
}
