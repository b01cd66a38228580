//! On-disk layout for single-stream uploads: one growing temp file per
//! upload id, written at a caller-supplied offset.

use super::error::UploadError;
use super::file_ops::{remove_dir_if_exists, remove_if_exists};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncSeekExt, AsyncWriteExt},
};

/// An append that stopped early.
///
/// `written` bytes starting at the requested offset were flushed to disk
/// before `error` occurred; they are not rolled back.
#[derive(Debug)]
pub struct PartialAppend {
    pub written: u64,
    pub error: UploadError,
}

#[derive(Clone, Debug)]
pub struct StreamWriter {
    root: PathBuf,
}

impl StreamWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(upload_id)
    }

    pub fn temp_path(&self, upload_id: &str) -> PathBuf {
        self.session_dir(upload_id).join("stream.bin")
    }

    /// Create the session directory and an empty temp file.
    pub async fn allocate(&self, upload_id: &str) -> io::Result<PathBuf> {
        let path = self.temp_path(upload_id);
        fs::create_dir_all(self.session_dir(upload_id)).await?;
        let file = File::create(&path).await?;
        file.sync_all().await?;
        Ok(path)
    }

    /// Write `stream` into the temp file starting at `offset`.
    ///
    /// At most `limit` bytes are accepted; a body that would go past it is
    /// rejected with `InvalidArgument` without writing the overflowing
    /// piece. The file is never truncated. Returns the number of bytes
    /// copied.
    pub async fn append<S>(
        &self,
        path: &Path,
        offset: u64,
        limit: u64,
        stream: S,
    ) -> Result<u64, PartialAppend>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut file = open_at(path, offset)
            .await
            .map_err(|err| PartialAppend {
                written: 0,
                error: UploadError::Storage(err),
            })?;

        let mut written = 0u64;
        let mut failure = None;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    failure = Some(UploadError::Storage(err));
                    break;
                }
            };
            if written + chunk.len() as u64 > limit {
                failure = Some(UploadError::InvalidArgument(format!(
                    "body exceeds the {} bytes remaining in this upload",
                    limit
                )));
                break;
            }
            if let Err(err) = file.write_all(&chunk).await {
                failure = Some(UploadError::Storage(err));
                break;
            }
            written += chunk.len() as u64;
        }

        // Whatever made it into the file is made durable before reporting.
        let synced = match file.flush().await {
            Ok(()) => file.sync_data().await,
            Err(err) => Err(err),
        };

        match (failure, synced) {
            (None, Ok(())) => Ok(written),
            (Some(error), _) => Err(PartialAppend { written, error }),
            (None, Err(err)) => Err(PartialAppend {
                written: 0,
                error: UploadError::Storage(err),
            }),
        }
    }

    /// Delete the temp file and its session directory. Missing paths are fine.
    pub async fn remove(&self, upload_id: &str, path: &Path) -> io::Result<()> {
        remove_if_exists(path).await?;
        remove_dir_if_exists(&self.session_dir(upload_id)).await
    }
}

async fn open_at(path: &Path, offset: u64) -> io::Result<File> {
    let mut file = OpenOptions::new().write(true).open(path).await?;
    let len = file.metadata().await?.len();
    if len < offset {
        return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("temp file holds {} bytes, cannot write at {}", len, offset),
        ));
    }
    file.seek(SeekFrom::Start(offset)).await?;
    Ok(file)
}
