//! Chunk-indexed uploads: chunks arrive in any order, possibly in parallel,
//! and are assembled into one file on commit.
//!
//! `put_chunk` calls for one upload share a read lock so they can run in
//! parallel; `commit` and `cancel` take the write lock and so never overlap
//! a chunk write. Which of two writers of the same index wins is decided by
//! the ledger insert, never by the filesystem.

use super::{
    chunk_ledger::ChunkLedger,
    chunk_store::{ChunkStore, StagedChunk},
    error::{UploadError, UploadResult},
    file_ops::{move_into_place, remove_if_exists},
    finalizer::Finalizer,
    keyed_locks::KeyedLocks,
};
use crate::models::{
    UploadStatus,
    asset::ContentCategory,
    chunk_upload::{ChunkUpload, UploadChunk, total_chunks_for},
    metadata::sanitize_filename,
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use std::{collections::BTreeSet, io};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on chunks per upload.
pub const MAX_TOTAL_CHUNKS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// This call stored the chunk.
    Stored { size: u64 },
    /// A chunk for this index was already recorded; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChunkUploadStatus {
    pub status: UploadStatus,
    pub total_chunks: i64,
    pub received: usize,
    pub missing: Vec<i64>,
}

/// Indices in `0..total_chunks` that are not in `received`, ascending.
pub fn missing_indexes(total_chunks: i64, received: &[i64]) -> Vec<i64> {
    let received: BTreeSet<i64> = received.iter().copied().collect();
    (0..total_chunks).filter(|idx| !received.contains(idx)).collect()
}

#[derive(Clone)]
pub struct ChunkCoordinator {
    ledger: ChunkLedger,
    store: ChunkStore,
    finalizer: Finalizer,
    locks: KeyedLocks,
}

impl ChunkCoordinator {
    pub fn new(
        ledger: ChunkLedger,
        store: ChunkStore,
        finalizer: Finalizer,
        locks: KeyedLocks,
    ) -> Self {
        Self {
            ledger,
            store,
            finalizer,
            locks,
        }
    }

    /// Open a chunked upload. Returns the new id and the chunk count the
    /// client must send.
    pub async fn init(
        &self,
        filename: &str,
        content_type: Option<&str>,
        total_size: i64,
        chunk_size: i64,
    ) -> UploadResult<ChunkUpload> {
        if total_size <= 0 {
            return Err(UploadError::InvalidArgument(
                "total_size must be positive".into(),
            ));
        }
        if chunk_size <= 0 {
            return Err(UploadError::InvalidArgument(
                "chunk_size must be positive".into(),
            ));
        }
        let total_chunks = total_chunks_for(total_size, chunk_size);
        if total_chunks > MAX_TOTAL_CHUNKS {
            return Err(UploadError::InvalidArgument(format!(
                "upload would need {} chunks, the limit is {}",
                total_chunks, MAX_TOTAL_CHUNKS
            )));
        }
        let filename = sanitize_filename(filename)?;

        let now = Utc::now();
        let upload = ChunkUpload {
            id: Uuid::new_v4(),
            filename,
            content_type: content_type
                .map(str::trim)
                .filter(|ct| !ct.is_empty())
                .map(str::to_string),
            total_size,
            chunk_size,
            total_chunks,
            final_path: None,
            status: UploadStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.ledger.insert_upload(&upload).await?;

        info!(
            upload_id = %upload.id,
            filename = %upload.filename,
            total_size,
            total_chunks,
            "initialized chunked upload"
        );
        Ok(upload)
    }

    /// Store chunk `idx`. Re-sending an index that is already recorded is
    /// a no-op success and leaves the first copy in place.
    pub async fn put_chunk<S>(
        &self,
        upload_id: Uuid,
        idx: i64,
        body: S,
        declared_size: Option<i64>,
        checksum: Option<String>,
    ) -> UploadResult<ChunkOutcome>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let key = upload_id.to_string();
        if self.ledger.chunk_exists(upload_id, idx).await?
            && !self.store.has_chunk(upload_id, idx).await?
        {
            let _repair = self.locks.write(&key).await;
            self.forget_if_absent(upload_id, idx).await?;
        }

        let _guard = self.locks.read(&key).await;

        let upload = self.ledger.fetch_upload(upload_id).await?;
        if upload.status.is_terminal() {
            return Err(UploadError::invalid_state(upload_id, upload.status));
        }
        if idx < 0 || idx >= upload.total_chunks {
            return Err(UploadError::InvalidArgument(format!(
                "chunk index {} outside 0..{}",
                idx, upload.total_chunks
            )));
        }
        if matches!(declared_size, Some(size) if size < 0) {
            return Err(UploadError::InvalidArgument(
                "chunk size must not be negative".into(),
            ));
        }
        if self.ledger.chunk_exists(upload_id, idx).await? {
            debug!(upload_id = %upload_id, idx, "chunk already present");
            return Ok(ChunkOutcome::Duplicate);
        }

        let staged = self.store.stage(upload_id, idx, body).await?;
        match self.record(&upload, idx, &staged, declared_size, checksum).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let _ = self.store.discard(&staged).await;
                Err(err)
            }
        }
    }

    async fn record(
        &self,
        upload: &ChunkUpload,
        idx: i64,
        staged: &StagedChunk,
        declared_size: Option<i64>,
        checksum: Option<String>,
    ) -> UploadResult<ChunkOutcome> {
        let size = staged.size as i64;
        if let Some(expected) = declared_size.filter(|expected| *expected != size) {
            return Err(UploadError::SizeMismatch {
                expected,
                actual: size,
            });
        }

        let chunk = UploadChunk {
            upload_id: upload.id,
            idx,
            size_bytes: size,
            checksum,
            stored_path: self
                .store
                .chunk_path(upload.id, idx)
                .to_string_lossy()
                .into_owned(),
            received_at: Utc::now(),
        };
        if !self.ledger.insert_chunk(&chunk).await? {
            debug!(upload_id = %upload.id, idx, "lost race for chunk index");
            self.store.discard(staged).await?;
            return Ok(ChunkOutcome::Duplicate);
        }

        if let Err(err) = self.store.promote(staged, upload.id, idx).await {
            warn!(upload_id = %upload.id, idx, error = %err, "failed to promote chunk");
            self.ledger.delete_chunk(upload.id, idx).await?;
            return Err(err.into());
        }

        self.ledger.mark_in_progress(upload.id).await?;
        debug!(upload_id = %upload.id, idx, size, "stored chunk");
        Ok(ChunkOutcome::Stored {
            size: staged.size,
        })
    }

    /// Drop the ledger row for `idx` if its file never made it to disk.
    /// Callers hold the write lock, so no chunk write is in flight.
    async fn forget_if_absent(&self, upload_id: Uuid, idx: i64) -> UploadResult<()> {
        if self.ledger.chunk_exists(upload_id, idx).await?
            && !self.store.has_chunk(upload_id, idx).await?
        {
            warn!(upload_id = %upload_id, idx, "chunk recorded without a file, marking it missing");
            self.ledger.delete_chunk(upload_id, idx).await?;
        }
        Ok(())
    }

    pub async fn missing_chunks(&self, upload_id: Uuid) -> UploadResult<Vec<i64>> {
        let upload = self.ledger.fetch_upload(upload_id).await?;
        self.missing_for(&upload).await
    }

    async fn missing_for(&self, upload: &ChunkUpload) -> UploadResult<Vec<i64>> {
        let received = self.ledger.received_indexes(upload.id).await?;
        Ok(missing_indexes(upload.total_chunks, &received))
    }

    pub async fn status(&self, upload_id: Uuid) -> UploadResult<ChunkUploadStatus> {
        let upload = self.ledger.fetch_upload(upload_id).await?;
        let received = self.ledger.received_indexes(upload_id).await?;
        Ok(ChunkUploadStatus {
            status: upload.status,
            total_chunks: upload.total_chunks,
            received: received.len(),
            missing: missing_indexes(upload.total_chunks, &received),
        })
    }

    /// Assemble every chunk into the final file and complete the upload.
    ///
    /// An assembled size that disagrees with the declared total marks the
    /// upload `FAILED`; the chunk files are kept so the failure can be
    /// inspected and cleaned up with `cancel`.
    pub async fn commit(&self, upload_id: Uuid) -> UploadResult<ChunkUpload> {
        let _guard = self.locks.write(&upload_id.to_string()).await;

        let upload = self.ledger.fetch_upload(upload_id).await?;
        if upload.status.is_terminal() {
            return Err(UploadError::invalid_state(upload_id, upload.status));
        }
        for chunk in self.ledger.chunks(upload_id).await? {
            self.forget_if_absent(upload_id, chunk.idx).await?;
        }
        let missing = self.missing_for(&upload).await?;
        if !missing.is_empty() {
            return Err(UploadError::IncompleteUpload { missing });
        }

        let assembled = self.store.assembled_path(upload_id);
        let written = match self
            .store
            .assemble(upload_id, upload.total_chunks, &assembled)
            .await
        {
            Ok(written) => written as i64,
            Err(err) => {
                let _ = remove_if_exists(&assembled).await;
                return Err(err.into());
            }
        };

        if written != upload.total_size {
            remove_if_exists(&assembled).await?;
            self.ledger
                .finish(upload_id, UploadStatus::Failed, None)
                .await?;
            warn!(
                upload_id = %upload_id,
                expected = upload.total_size,
                actual = written,
                "assembled size mismatch, upload failed"
            );
            return Err(UploadError::SizeMismatch {
                expected: upload.total_size,
                actual: written,
            });
        }

        let final_path = self.finalizer.final_root().join(&upload.filename);
        if let Err(err) = move_into_place(&assembled, &final_path).await {
            let _ = remove_if_exists(&assembled).await;
            return Err(err.into());
        }
        let final_path = final_path.to_string_lossy().into_owned();

        if !self
            .ledger
            .finish(upload_id, UploadStatus::Completed, Some(&final_path))
            .await?
        {
            let current = self.ledger.fetch_upload(upload_id).await?;
            return Err(UploadError::invalid_state(upload_id, current.status));
        }

        self.ledger.delete_chunks(upload_id).await?;
        if let Err(err) = self.store.remove_session(upload_id).await {
            warn!(upload_id = %upload_id, error = %err, "failed to remove chunk directory");
        }

        let category = ContentCategory::from_mime(upload.content_type.as_deref());
        self.finalizer
            .publish(&upload_id.to_string(), category)
            .await;

        info!(
            upload_id = %upload_id,
            final_path = %final_path,
            size = written,
            "committed chunked upload"
        );
        self.ledger.fetch_upload(upload_id).await
    }

    /// Cancel and delete every stored chunk. Safe to repeat on a cancelled
    /// or failed upload; a committed upload cannot be cancelled.
    pub async fn cancel(&self, upload_id: Uuid) -> UploadResult<()> {
        let _guard = self.locks.write(&upload_id.to_string()).await;

        let upload = self.ledger.fetch_upload(upload_id).await?;
        if upload.status == UploadStatus::Completed {
            debug!(upload_id = %upload_id, "cancel on completed upload");
            return Err(UploadError::invalid_state(upload_id, upload.status));
        }
        if !upload.status.is_terminal() {
            self.ledger
                .finish(upload_id, UploadStatus::Cancelled, None)
                .await?;
        }
        self.ledger.delete_chunks(upload_id).await?;
        self.store.remove_session(upload_id).await?;
        info!(upload_id = %upload_id, "cancelled chunked upload");
        Ok(())
    }
}
