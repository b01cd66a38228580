//! On-disk layout for chunked upload sessions.
//!
//! Each session owns `root/{upload_id}/`, holding one `chunk-{idx}` file per
//! received index. Bodies stream into a uniquely named `.part` file first and
//! are promoted by rename, so a half-written chunk never sits at its final
//! name. No protocol knowledge lives here.

use super::file_ops::{move_into_place, remove_dir_if_exists, remove_if_exists};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use uuid::Uuid;

/// A chunk body written to its staging file, not yet promoted.
#[derive(Debug)]
pub struct StagedChunk {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Clone, Debug)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, upload_id: Uuid) -> PathBuf {
        self.root.join(upload_id.to_string())
    }

    pub fn chunk_path(&self, upload_id: Uuid, idx: i64) -> PathBuf {
        self.session_dir(upload_id).join(format!("chunk-{}", idx))
    }

    pub fn assembled_path(&self, upload_id: Uuid) -> PathBuf {
        self.session_dir(upload_id).join("assembled.part")
    }

    /// Stream a chunk body into a fresh staging file.
    ///
    /// The staging file is created with `create_new`, so concurrent senders
    /// of the same index never share a file. On any I/O error the staging
    /// file is removed and nothing is left behind.
    pub async fn stage<S>(&self, upload_id: Uuid, idx: i64, stream: S) -> io::Result<StagedChunk>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let dir = self.session_dir(upload_id);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("chunk-{}.{}.part", idx, Uuid::new_v4()));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        match copy_stream(&mut file, stream).await {
            Ok(size) => Ok(StagedChunk { path, size }),
            Err(err) => {
                drop(file);
                let _ = remove_if_exists(&path).await;
                Err(err)
            }
        }
    }

    /// Rename a staged chunk to its final `chunk-{idx}` name.
    pub async fn promote(&self, staged: &StagedChunk, upload_id: Uuid, idx: i64) -> io::Result<PathBuf> {
        let target = self.chunk_path(upload_id, idx);
        move_into_place(&staged.path, &target).await?;
        Ok(target)
    }

    /// Whether `chunk-{idx}` is present at its final name.
    pub async fn has_chunk(&self, upload_id: Uuid, idx: i64) -> io::Result<bool> {
        fs::try_exists(self.chunk_path(upload_id, idx)).await
    }

    /// Drop a staged chunk that lost a race or failed verification.
    pub async fn discard(&self, staged: &StagedChunk) -> io::Result<()> {
        remove_if_exists(&staged.path).await
    }

    /// Concatenate `chunk-0 .. chunk-{total_chunks-1}` into `dest`, in index
    /// order, returning the number of bytes written. `dest` is truncated
    /// first. A missing chunk file fails with `NotFound`.
    pub async fn assemble(&self, upload_id: Uuid, total_chunks: i64, dest: &Path) -> io::Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut out = File::create(dest).await?;
        let mut written = 0u64;

        for idx in 0..total_chunks {
            let chunk_path = self.chunk_path(upload_id, idx);
            let mut chunk = File::open(&chunk_path).await.map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    io::Error::new(ErrorKind::NotFound, format!("chunk {} missing on disk", idx))
                } else {
                    err
                }
            })?;
            written += tokio::io::copy(&mut chunk, &mut out).await?;
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok(written)
    }

    /// Remove the whole session directory. Missing directories are fine.
    pub async fn remove_session(&self, upload_id: Uuid) -> io::Result<()> {
        remove_dir_if_exists(&self.session_dir(upload_id)).await
    }
}

async fn copy_stream<S>(file: &mut File, stream: S) -> io::Result<u64>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut size = 0u64;
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(size)
}
