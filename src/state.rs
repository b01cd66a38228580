//! Shared state handed to every handler.

use crate::services::{
    chunk_coordinator::ChunkCoordinator,
    chunk_ledger::ChunkLedger,
    chunk_store::ChunkStore,
    finalizer::Finalizer,
    keyed_locks::KeyedLocks,
    owner::{OwnerResolver, UuidOwnerResolver},
    range_reader::RangeReader,
    stream_coordinator::StreamCoordinator,
    stream_ledger::StreamLedger,
    stream_writer::StreamWriter,
    task_queue::{SqliteTaskQueue, TaskQueue},
};
use sqlx::SqlitePool;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub temp_dir: PathBuf,
    pub final_dir: PathBuf,
    pub tus_version: Arc<str>,
    pub streams: StreamCoordinator,
    pub chunks: ChunkCoordinator,
    pub finalizer: Finalizer,
    pub ranges: RangeReader,
    pub owners: Arc<dyn OwnerResolver>,
}

impl AppState {
    /// Wire the services with the SQLite outbox queue and the UUID owner
    /// resolver.
    pub fn new(
        db: Arc<SqlitePool>,
        temp_dir: impl AsRef<Path>,
        final_dir: impl AsRef<Path>,
        tus_version: &str,
    ) -> Self {
        let tasks: Arc<dyn TaskQueue> = Arc::new(SqliteTaskQueue::new(db.clone()));
        Self::with_collaborators(
            db,
            temp_dir,
            final_dir,
            tus_version,
            tasks,
            Arc::new(UuidOwnerResolver),
        )
    }

    pub fn with_collaborators(
        db: Arc<SqlitePool>,
        temp_dir: impl AsRef<Path>,
        final_dir: impl AsRef<Path>,
        tus_version: &str,
        tasks: Arc<dyn TaskQueue>,
        owners: Arc<dyn OwnerResolver>,
    ) -> Self {
        let temp_dir = temp_dir.as_ref().to_path_buf();
        let final_dir = final_dir.as_ref().to_path_buf();
        let locks = KeyedLocks::new();
        let finalizer = Finalizer::new(db.clone(), &final_dir, tasks);

        let streams = StreamCoordinator::new(
            StreamLedger::new(db.clone()),
            StreamWriter::new(temp_dir.join("streams")),
            finalizer.clone(),
            locks.clone(),
        );
        let chunks = ChunkCoordinator::new(
            ChunkLedger::new(db.clone()),
            ChunkStore::new(temp_dir.join("chunks")),
            finalizer.clone(),
            locks,
        );

        Self {
            db,
            ranges: RangeReader::new(&final_dir),
            temp_dir,
            final_dir,
            tus_version: Arc::from(tus_version),
            streams,
            chunks,
            finalizer,
            owners,
        }
    }
}
