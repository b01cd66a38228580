//! Single-stream resumable uploads (the tus core protocol).
//!
//! The client's `Upload-Offset` must equal the stored offset exactly; that
//! match is what rejects stale or reordered retries. Appends for one upload
//! id are serialized, and the ledger update is itself a compare-and-swap on
//! the offset.

use super::{
    error::{UploadError, UploadResult},
    finalizer::Finalizer,
    keyed_locks::KeyedLocks,
    owner::OwnerContext,
    stream_ledger::StreamLedger,
    stream_writer::{PartialAppend, StreamWriter},
};
use crate::models::{
    UploadStatus,
    metadata::{UploadMetadata, sanitize_filename},
    stream_upload::{StreamUpload, StreamUploadInfo},
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::{io, path::PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct StreamCoordinator {
    ledger: StreamLedger,
    writer: StreamWriter,
    finalizer: Finalizer,
    locks: KeyedLocks,
}

impl StreamCoordinator {
    pub fn new(
        ledger: StreamLedger,
        writer: StreamWriter,
        finalizer: Finalizer,
        locks: KeyedLocks,
    ) -> Self {
        Self {
            ledger,
            writer,
            finalizer,
            locks,
        }
    }

    pub fn ledger(&self) -> &StreamLedger {
        &self.ledger
    }

    /// Start a new upload of `declared_length` bytes and allocate its temp
    /// file. Returns the external upload id.
    pub async fn create(
        &self,
        declared_length: i64,
        metadata_header: Option<&str>,
    ) -> UploadResult<String> {
        if declared_length < 0 {
            return Err(UploadError::InvalidArgument(
                "Upload-Length must not be negative".into(),
            ));
        }
        let metadata = UploadMetadata::parse(metadata_header)?;
        let upload_id = Uuid::new_v4().to_string();
        let filename = match metadata.filename() {
            Some(raw) => sanitize_filename(raw)?,
            None => upload_id.clone(),
        };

        let temp_path = self.writer.allocate(&upload_id).await?;
        let now = Utc::now();
        let record = StreamUpload {
            id: Uuid::new_v4(),
            upload_id: upload_id.clone(),
            upload_length: declared_length,
            upload_offset: 0,
            metadata: metadata_header.map(str::to_string),
            filename,
            filetype: metadata.filetype().map(str::to_string),
            temp_path: temp_path.to_string_lossy().into_owned(),
            final_path: None,
            status: UploadStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.ledger.insert(&record).await {
            let _ = self.writer.remove(&upload_id, &temp_path).await;
            return Err(err);
        }

        info!(
            upload_id = %upload_id,
            upload_length = declared_length,
            filename = %record.filename,
            "created stream upload"
        );
        Ok(upload_id)
    }

    /// Append `body` at `client_offset`, returning the new offset.
    ///
    /// When the new offset reaches the declared length the upload is
    /// finalized before this returns. If the body breaks off midway, the
    /// bytes already flushed are still recorded so the client can resume
    /// after them. A body longer than the remaining length leaves the
    /// offset untouched; with a known `content_length` it is refused before
    /// the temp file is opened.
    pub async fn append<S>(
        &self,
        upload_id: &str,
        client_offset: i64,
        content_length: Option<u64>,
        owner: &OwnerContext,
        body: S,
    ) -> UploadResult<i64>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let _guard = self.locks.write(upload_id).await;

        let record = self.ledger.fetch(upload_id).await?;
        if record.status.is_terminal() {
            return Err(UploadError::invalid_state(upload_id, record.status));
        }
        if client_offset != record.upload_offset {
            warn!(
                upload_id = %upload_id,
                expected = record.upload_offset,
                actual = client_offset,
                "rejected append with stale offset"
            );
            return Err(UploadError::OffsetConflict {
                expected: record.upload_offset,
                actual: client_offset,
            });
        }

        if let Some(length) = content_length.filter(|len| *len > record.remaining() as u64) {
            return Err(overflow(length, record.remaining()));
        }

        let temp_path = PathBuf::from(&record.temp_path);
        let (written, failure) = match self
            .writer
            .append(
                &temp_path,
                client_offset as u64,
                record.remaining() as u64,
                body,
            )
            .await
        {
            Ok(written) => (written as i64, None),
            Err(PartialAppend { written, error }) => (written as i64, Some(error)),
        };

        let failure = match failure {
            Some(err) if written == 0 => return Err(err),
            // Overflowing bodies are rejected whole; the bytes past the
            // recorded offset get overwritten by the next append.
            Some(err @ UploadError::InvalidArgument(_)) => return Err(err),
            other => other,
        };

        let new_offset = self
            .ledger
            .advance_offset(upload_id, client_offset, written)
            .await?;
        debug!(
            upload_id = %upload_id,
            offset = new_offset,
            bytes = written,
            "appended to stream upload"
        );

        let mut current = record;
        current.upload_offset = new_offset;
        if current.is_complete() {
            self.finalizer.finalize(&current, owner).await?;
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(new_offset),
        }
    }

    pub async fn info(&self, upload_id: &str) -> UploadResult<StreamUploadInfo> {
        let record = self.ledger.fetch(upload_id).await?;
        Ok(StreamUploadInfo::from(&record))
    }

    /// Cancel the upload and delete its temp file. Already-terminal uploads
    /// are left as they are.
    pub async fn terminate(&self, upload_id: &str) -> UploadResult<()> {
        let _guard = self.locks.write(upload_id).await;

        let record = self.ledger.fetch(upload_id).await?;
        if record.status.is_terminal() {
            debug!(upload_id = %upload_id, status = %record.status, "terminate on terminal upload");
            return Ok(());
        }

        if self.ledger.mark_cancelled(upload_id).await? {
            self.writer
                .remove(upload_id, &PathBuf::from(&record.temp_path))
                .await?;
            info!(upload_id = %upload_id, "terminated stream upload");
        }
        Ok(())
    }
}

fn overflow(length: u64, remaining: i64) -> UploadError {
    UploadError::InvalidArgument(format!(
        "body of {} bytes exceeds the {} bytes remaining in this upload",
        length, remaining
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::ledger_pool;
    use crate::services::task_queue::testing::RecordingQueue;
    use futures::stream;
    use std::{path::Path, sync::Arc};
    use tempfile::TempDir;
    use tokio::fs;

    struct Fixture {
        _dir: TempDir,
        coordinator: StreamCoordinator,
        tasks: Arc<RecordingQueue>,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = ledger_pool(&dir).await;
        let tasks = Arc::new(RecordingQueue::default());
        let finalizer = Finalizer::new(pool.clone(), dir.path().join("final"), tasks.clone());
        let coordinator = StreamCoordinator::new(
            StreamLedger::new(pool),
            StreamWriter::new(dir.path().join("tmp")),
            finalizer,
            KeyedLocks::new(),
        );
        Fixture {
            _dir: dir,
            coordinator,
            tasks,
        }
    }

    fn owner() -> OwnerContext {
        OwnerContext {
            owner_id: "0b3a1e0c-52b1-4a7b-9d2e-7a1f7b3d8c11".into(),
        }
    }

    fn body(data: Vec<u8>) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(vec![Ok(Bytes::from(data))])
    }

    #[tokio::test]
    async fn sequential_appends_advance_offset() {
        let fx = fixture().await;
        let id = fx.coordinator.create(10, None).await.unwrap();

        let info = fx.coordinator.info(&id).await.unwrap();
        assert_eq!((info.offset, info.length, info.status), (0, 10, UploadStatus::Pending));

        let offset = fx
            .coordinator
            .append(&id, 0, None, &owner(), body(b"abcd".to_vec()))
            .await
            .unwrap();
        assert_eq!(offset, 4);
        let info = fx.coordinator.info(&id).await.unwrap();
        assert_eq!(info.status, UploadStatus::InProgress);
        assert_eq!(info.offset, 4);
    }

    #[tokio::test]
    async fn mismatched_offset_conflicts_and_changes_nothing() {
        let fx = fixture().await;
        let id = fx.coordinator.create(10, None).await.unwrap();
        fx.coordinator
            .append(&id, 0, None, &owner(), body(b"abcd".to_vec()))
            .await
            .unwrap();

        for stale in [0, 3, 5, 9] {
            let err = fx
                .coordinator
                .append(&id, stale, None, &owner(), body(b"zz".to_vec()))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                UploadError::OffsetConflict { expected: 4, actual } if actual == stale
            ));
        }
        assert_eq!(fx.coordinator.info(&id).await.unwrap().offset, 4);
    }

    #[tokio::test]
    async fn reaching_the_length_finalizes() {
        let fx = fixture().await;
        let meta = "filename Y2xpcC5tcDQ=,filetype dmlkZW8vbXA0";
        let id = fx.coordinator.create(500, Some(meta)).await.unwrap();

        let data = vec![7u8; 500];
        let offset = fx
            .coordinator
            .append(&id, 0, None, &owner(), body(data.clone()))
            .await
            .unwrap();
        assert_eq!(offset, 500);

        let record = fx.coordinator.ledger().fetch(&id).await.unwrap();
        assert_eq!(record.status, UploadStatus::Completed);
        assert_eq!(record.upload_offset, 500);
        assert_eq!(record.filename, "clip.mp4");
        let final_path = record.final_path.expect("final path set");
        assert!(final_path.ends_with(&format!("{}_clip.mp4", id)));
        assert_eq!(fs::read(&final_path).await.unwrap(), data);
        assert!(!Path::new(&record.temp_path).exists());
        assert_eq!(fx.tasks.queues().len(), 4);

        let info = fx.coordinator.info(&id).await.unwrap();
        assert_eq!((info.offset, info.length), (500, 500));
    }

    #[tokio::test]
    async fn terminal_uploads_reject_appends() {
        let fx = fixture().await;
        let done = fx.coordinator.create(2, None).await.unwrap();
        fx.coordinator
            .append(&done, 0, None, &owner(), body(b"ok".to_vec()))
            .await
            .unwrap();
        let err = fx
            .coordinator
            .append(&done, 2, None, &owner(), body(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidState { .. }));

        let cancelled = fx.coordinator.create(2, None).await.unwrap();
        fx.coordinator.terminate(&cancelled).await.unwrap();
        let err = fx
            .coordinator
            .append(&cancelled, 0, None, &owner(), body(b"ok".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn terminate_removes_temp_file_and_is_idempotent() {
        let fx = fixture().await;
        let id = fx.coordinator.create(10, None).await.unwrap();
        let record = fx.coordinator.ledger().fetch(&id).await.unwrap();
        assert!(Path::new(&record.temp_path).exists());

        fx.coordinator.terminate(&id).await.unwrap();
        fx.coordinator.terminate(&id).await.unwrap();

        assert!(!Path::new(&record.temp_path).exists());
        assert_eq!(
            fx.coordinator.info(&id).await.unwrap().status,
            UploadStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn body_longer_than_declared_is_refused() {
        let fx = fixture().await;
        let id = fx.coordinator.create(3, None).await.unwrap();
        let err = fx
            .coordinator
            .append(&id, 0, None, &owner(), body(b"abcdef".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidArgument(_)));
        assert_eq!(fx.coordinator.info(&id).await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn overflow_in_a_later_frame_records_nothing() {
        let fx = fixture().await;
        let id = fx.coordinator.create(5, None).await.unwrap();
        let frames = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"defg")),
        ]);
        let err = fx
            .coordinator
            .append(&id, 0, None, &owner(), frames)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidArgument(_)));
        assert_eq!(fx.coordinator.info(&id).await.unwrap().offset, 0);

        let offset = fx
            .coordinator
            .append(&id, 0, Some(5), &owner(), body(b"vwxyz".to_vec()))
            .await
            .unwrap();
        assert_eq!(offset, 5);
    }

    #[tokio::test]
    async fn declared_content_length_past_the_end_is_refused_up_front() {
        let fx = fixture().await;
        let id = fx.coordinator.create(4, None).await.unwrap();
        let err = fx
            .coordinator
            .append(&id, 0, Some(9), &owner(), body(b"ab".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidArgument(_)));
        assert_eq!(fx.coordinator.info(&id).await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn interrupted_body_keeps_flushed_progress() {
        let fx = fixture().await;
        let id = fx.coordinator.create(10, None).await.unwrap();
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let err = fx
            .coordinator
            .append(&id, 0, None, &owner(), broken)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Storage(_)));
        assert_eq!(fx.coordinator.info(&id).await.unwrap().offset, 3);

        let offset = fx
            .coordinator
            .append(&id, 3, None, &owner(), body(b"defghij".to_vec()))
            .await
            .unwrap();
        assert_eq!(offset, 10);
    }

    #[tokio::test]
    async fn zero_length_upload_completes_on_empty_append() {
        let fx = fixture().await;
        let id = fx.coordinator.create(0, None).await.unwrap();
        let offset = fx
            .coordinator
            .append(&id, 0, None, &owner(), body(Vec::new()))
            .await
            .unwrap();
        assert_eq!(offset, 0);
        assert_eq!(
            fx.coordinator.info(&id).await.unwrap().status,
            UploadStatus::Completed
        );
    }

    #[tokio::test]
    async fn concurrent_appends_at_same_offset_have_one_winner() {
        let fx = fixture().await;
        let id = fx.coordinator.create(100, None).await.unwrap();

        let who = owner();
        let (a, b) = tokio::join!(
            fx.coordinator.append(&id, 0, None, &who, body(vec![1u8; 10])),
            fx.coordinator.append(&id, 0, None, &who, body(vec![2u8; 10])),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(UploadError::OffsetConflict { .. })))
        );
        assert_eq!(fx.coordinator.info(&id).await.unwrap().offset, 10);
    }

    #[tokio::test]
    async fn invalid_metadata_is_rejected_before_allocation() {
        let fx = fixture().await;
        let err = fx
            .coordinator
            .create(10, Some("filename ***"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidArgument(_)));

        let err = fx.coordinator.create(-1, None).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let fx = fixture().await;
        assert!(matches!(
            fx.coordinator.info("nope").await.unwrap_err(),
            UploadError::NotFound(_)
        ));
        assert!(matches!(
            fx.coordinator.terminate("nope").await.unwrap_err(),
            UploadError::NotFound(_)
        ));
        assert!(matches!(
            fx.coordinator
                .append("nope", 0, None, &owner(), body(Vec::new()))
                .await
                .unwrap_err(),
            UploadError::NotFound(_)
        ));
    }
}
