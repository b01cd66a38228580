//! Finalizer - turns a fully received upload into a durable artifact.
//!
//! Order of operations for a stream upload:
//! 1. checksum the temp file (full scan on the blocking pool)
//! 2. in one transaction: asset row, owner usage counter, ledger `COMPLETED`
//! 3. rename temp -> final path
//! 4. push one task per downstream consumer
//!
//! A crash between 2 and 3 leaves a `COMPLETED` row whose `final_path` does
//! not exist yet. [`Finalizer::reconcile`] finds and repairs those.

use super::{
    error::{UploadError, UploadResult},
    file_ops::{move_into_place, remove_dir_if_exists},
    owner::OwnerContext,
    stream_ledger::StreamLedger,
    task_queue::{
        METADATA_QUEUE, REMOTE_SYNC_QUEUE, THUMBNAIL_QUEUE, TaskQueue, VIDEO_TRANSCODE_QUEUE,
    },
};
use crate::models::{
    asset::{Asset, ContentCategory},
    stream_upload::StreamUpload,
};
use chrono::Utc;
use md5::Context;
use sqlx::SqlitePool;
use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, error, info, warn};

const CHECKSUM_BUF_SIZE: usize = 128 * 1024;

/// Outcome of a reconciliation sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub recovered: usize,
    pub unrecoverable: usize,
}

#[derive(Clone)]
pub struct Finalizer {
    db: Arc<SqlitePool>,
    final_root: PathBuf,
    tasks: Arc<dyn TaskQueue>,
}

impl Finalizer {
    pub fn new(db: Arc<SqlitePool>, final_root: impl Into<PathBuf>, tasks: Arc<dyn TaskQueue>) -> Self {
        Self {
            db,
            final_root: final_root.into(),
            tasks,
        }
    }

    pub fn final_root(&self) -> &Path {
        &self.final_root
    }

    /// `final_root/originals/{owner}/{category}/{upload_id}_{filename}`.
    pub fn original_path(
        &self,
        owner: &OwnerContext,
        category: ContentCategory,
        upload_id: &str,
        filename: &str,
    ) -> PathBuf {
        self.final_root
            .join("originals")
            .join(&owner.owner_id)
            .join(category.as_str().to_ascii_lowercase())
            .join(format!("{}_{}", upload_id, filename))
    }

    /// Finalize a stream upload whose bytes are all in its temp file.
    pub async fn finalize(&self, record: &StreamUpload, owner: &OwnerContext) -> UploadResult<Asset> {
        let temp_path = PathBuf::from(&record.temp_path);
        let (checksum, size) = file_checksum(&temp_path).await?;
        if size != record.upload_length as u64 {
            return Err(UploadError::SizeMismatch {
                expected: record.upload_length,
                actual: size as i64,
            });
        }

        let category = ContentCategory::from_mime(record.filetype.as_deref());
        let final_path = self.original_path(owner, category, &record.upload_id, &record.filename);
        let final_path_str = final_path.to_string_lossy().into_owned();

        let asset = Asset {
            id: record.upload_id.clone(),
            owner_id: owner.owner_id.clone(),
            category,
            original_path: final_path_str.clone(),
            original_filename: record.filename.clone(),
            content_type: record.filetype.clone(),
            checksum,
            size_bytes: record.upload_length,
            created_at: Utc::now(),
        };

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO assets (
                id, owner_id, category, original_path, original_filename,
                content_type, checksum, size_bytes, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&asset.id)
        .bind(&asset.owner_id)
        .bind(asset.category)
        .bind(&asset.original_path)
        .bind(&asset.original_filename)
        .bind(&asset.content_type)
        .bind(&asset.checksum)
        .bind(asset.size_bytes)
        .bind(asset.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO owner_usage (owner_id, bytes_used, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(owner_id) DO UPDATE SET
                bytes_used = bytes_used + excluded.bytes_used,
                updated_at = excluded.updated_at",
        )
        .bind(&asset.owner_id)
        .bind(asset.size_bytes)
        .bind(asset.created_at)
        .execute(&mut *tx)
        .await?;

        if !StreamLedger::mark_completed(&mut tx, &record.upload_id, &final_path_str).await? {
            tx.rollback().await?;
            return Err(UploadError::invalid_state(&record.upload_id, "terminal"));
        }
        tx.commit().await?;

        if let Err(err) = self.place(&temp_path, &final_path).await {
            error!(
                upload_id = %record.upload_id,
                final_path = %final_path.display(),
                "upload committed but rename failed; reconcile will retry: {}",
                err
            );
            return Err(UploadError::Storage(err));
        }

        info!(
            upload_id = %record.upload_id,
            owner_id = %asset.owner_id,
            category = %category,
            size_bytes = asset.size_bytes,
            checksum = %asset.checksum,
            "upload finalized"
        );

        self.publish(&asset.id, category).await;
        Ok(asset)
    }

    /// Push one task per downstream consumer. Failures are logged only;
    /// the upload is already committed.
    pub async fn publish(&self, asset_id: &str, category: ContentCategory) {
        let mut queues = vec![THUMBNAIL_QUEUE, METADATA_QUEUE, REMOTE_SYNC_QUEUE];
        if category == ContentCategory::Video {
            queues.push(VIDEO_TRANSCODE_QUEUE);
        }
        for queue in queues {
            match self.tasks.push(queue, asset_id).await {
                Ok(()) => debug!(asset_id = %asset_id, queue = queue, "queued downstream task"),
                Err(err) => warn!(
                    asset_id = %asset_id,
                    queue = queue,
                    "failed to queue downstream task: {}",
                    err
                ),
            }
        }
    }

    /// Repair completed uploads whose final file never appeared.
    ///
    /// When the temp file survived, the rename is redone and downstream
    /// tasks are pushed again. Otherwise the upload is reported as
    /// unrecoverable.
    pub async fn reconcile(&self, ledger: &StreamLedger) -> UploadResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for record in ledger.completed().await? {
            report.checked += 1;
            let Some(final_path) = record.final_path.as_deref().map(PathBuf::from) else {
                warn!(upload_id = %record.upload_id, "completed upload has no final path");
                report.unrecoverable += 1;
                continue;
            };
            if tokio::fs::try_exists(&final_path).await? {
                continue;
            }

            let temp_path = PathBuf::from(&record.temp_path);
            if !tokio::fs::try_exists(&temp_path).await? {
                error!(
                    upload_id = %record.upload_id,
                    "completed upload lost: neither final nor temp file exists"
                );
                report.unrecoverable += 1;
                continue;
            }

            self.place(&temp_path, &final_path).await?;
            warn!(
                upload_id = %record.upload_id,
                final_path = %final_path.display(),
                "recovered interrupted finalize"
            );
            let category = ContentCategory::from_mime(record.filetype.as_deref());
            self.publish(&record.upload_id, category).await;
            report.recovered += 1;
        }
        Ok(report)
    }

    async fn place(&self, temp_path: &Path, final_path: &Path) -> io::Result<()> {
        move_into_place(temp_path, final_path).await?;
        if let Some(session_dir) = temp_path.parent() {
            if let Err(err) = remove_dir_if_exists(session_dir).await {
                debug!("failed to remove session dir {}: {}", session_dir.display(), err);
            }
        }
        Ok(())
    }
}

/// MD5 (hex) and length of a file, computed on the blocking pool.
pub async fn file_checksum(path: &Path) -> io::Result<(String, u64)> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = File::open(&path)?;
        let mut digest = Context::new();
        let mut buf = vec![0u8; CHECKSUM_BUF_SIZE];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            digest.consume(&buf[..n]);
            size += n as u64;
        }
        Ok((format!("{:x}", digest.compute()), size))
    })
    .await
    .map_err(io::Error::other)?
}
