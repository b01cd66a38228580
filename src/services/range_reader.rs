//! Byte-range reads of finalized files for streaming playback.

use super::error::{UploadError, UploadResult};
use crate::models::metadata::sanitize_filename;
use std::{
    io::{ErrorKind, SeekFrom},
    path::PathBuf,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, Take},
};
use tokio_util::io::ReaderStream;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `bytes {start}-{end}/{size}`
    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}

/// Resolve a `Range` header against a file of `file_size` bytes.
///
/// Only the first range of a multi-range header is used. An `end` past the
/// file is clamped; an `end` before `start` is treated as open-ended.
pub fn parse_range(header: &str, file_size: u64) -> UploadResult<ByteRange> {
    let unsatisfiable = || UploadError::InvalidRange { file_size };

    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(unsatisfiable)?;
    let first = spec.split(',').next().unwrap_or_default().trim();
    let (start, end) = first.split_once('-').ok_or_else(unsatisfiable)?;
    let (start, end) = (start.trim(), end.trim());

    if file_size == 0 {
        return Err(unsatisfiable());
    }
    let last = file_size - 1;

    if start.is_empty() {
        let suffix: u64 = end.parse().map_err(|_| unsatisfiable())?;
        if suffix == 0 {
            return Err(unsatisfiable());
        }
        return Ok(ByteRange {
            start: file_size.saturating_sub(suffix),
            end: last,
        });
    }

    let start: u64 = start.parse().map_err(|_| unsatisfiable())?;
    if start >= file_size {
        return Err(unsatisfiable());
    }
    let end = if end.is_empty() {
        last
    } else {
        let end: u64 = end.parse().map_err(|_| unsatisfiable())?;
        if end < start { last } else { end.min(last) }
    };
    Ok(ByteRange { start, end })
}

/// An open file positioned at the start of the requested bytes.
pub struct RangedFile {
    pub filename: String,
    pub file_size: u64,
    /// `None` for a whole-file read.
    pub range: Option<ByteRange>,
    pub content_type: String,
    pub body: ReaderStream<Take<File>>,
}

impl RangedFile {
    pub fn content_length(&self) -> u64 {
        self.range.map_or(self.file_size, |range| range.len())
    }

    pub fn content_range(&self) -> Option<String> {
        self.range.map(|range| range.content_range(self.file_size))
    }
}

#[derive(Clone, Debug)]
pub struct RangeReader {
    root: PathBuf,
}

impl RangeReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open `filename` under the root and bound the read to `range`, or to
    /// the whole file when no range is given.
    pub async fn read_range(&self, filename: &str, range: Option<&str>) -> UploadResult<RangedFile> {
        let filename = sanitize_filename(filename)?;
        let path = self.root.join(&filename);

        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(UploadError::NotFound(filename));
            }
            Err(err) => return Err(err.into()),
        };
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(UploadError::NotFound(filename));
        }
        let file_size = meta.len();

        let range = range.map(|header| parse_range(header, file_size)).transpose()?;
        let (offset, len) = match range {
            Some(range) => (range.start, range.len()),
            None => (0, file_size),
        };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(RangedFile {
            filename,
            file_size,
            range,
            content_type,
            body: ReaderStream::with_capacity(file.take(len), READ_BUF_SIZE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;

    async fn collect(file: RangedFile) -> Vec<u8> {
        let mut body = file.body;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[test]
    fn parses_closed_open_and_suffix_ranges() {
        assert_eq!(parse_range("bytes=0-9", 100).unwrap(), ByteRange { start: 0, end: 9 });
        assert_eq!(parse_range("bytes=10-", 100).unwrap(), ByteRange { start: 10, end: 99 });
        assert_eq!(parse_range("bytes=-10", 100).unwrap(), ByteRange { start: 90, end: 99 });
        assert_eq!(parse_range("bytes=-500", 100).unwrap(), ByteRange { start: 0, end: 99 });
    }

    #[test]
    fn clamps_and_reorders() {
        assert_eq!(parse_range("bytes=50-1000", 100).unwrap(), ByteRange { start: 50, end: 99 });
        assert_eq!(parse_range("bytes=50-10", 100).unwrap(), ByteRange { start: 50, end: 99 });
        assert_eq!(
            parse_range("bytes=0-4, 10-20", 100).unwrap(),
            ByteRange { start: 0, end: 4 }
        );
    }

    #[test]
    fn rejects_unsatisfiable_or_malformed() {
        for header in [
            "bytes=100-",
            "bytes=500-600",
            "bytes=-0",
            "items=0-1",
            "bytes=abc-",
            "bytes=1-x",
            "bytes=5",
            "bytes=--1",
        ] {
            let err = parse_range(header, 100).unwrap_err();
            assert!(
                matches!(err, UploadError::InvalidRange { file_size: 100 }),
                "{header} should be rejected"
            );
        }
        assert!(parse_range("bytes=0-", 0).is_err());
    }

    #[test]
    fn content_range_descriptor() {
        let range = parse_range("bytes=0-", 42).unwrap();
        assert_eq!(range.len(), 42);
        assert_eq!(range.content_range(42), "bytes 0-41/42");
    }

    #[tokio::test]
    async fn whole_file_without_range() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("clip.mp4"), b"0123456789").await.unwrap();
        let reader = RangeReader::new(dir.path());

        let file = reader.read_range("clip.mp4", None).await.unwrap();
        assert_eq!(file.content_length(), 10);
        assert_eq!(file.content_range(), None);
        assert_eq!(file.content_type, "video/mp4");
        assert_eq!(collect(file).await, b"0123456789");
    }

    #[tokio::test]
    async fn bounded_read_for_range() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"0123456789").await.unwrap();
        let reader = RangeReader::new(dir.path());

        let file = reader.read_range("a.txt", Some("bytes=2-5")).await.unwrap();
        assert_eq!(file.content_range().as_deref(), Some("bytes 2-5/10"));
        assert_eq!(file.content_length(), 4);
        assert_eq!(collect(file).await, b"2345");

        let file = reader.read_range("a.txt", Some("bytes=-3")).await.unwrap();
        assert_eq!(collect(file).await, b"789");
    }

    #[tokio::test]
    async fn missing_or_unsafe_names_are_not_found() {
        let dir = TempDir::new().unwrap();
        let reader = RangeReader::new(dir.path().join("final"));
        tokio::fs::write(dir.path().join("secret"), b"x").await.unwrap();

        assert!(matches!(
            reader.read_range("nope.bin", None).await,
            Err(UploadError::NotFound(_))
        ));
        assert!(matches!(
            reader.read_range("../secret", None).await,
            Err(UploadError::NotFound(_))
        ));
    }
}
