use std::io;
use thiserror::Error;

/// Failures surfaced by the upload engine.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload `{0}` not found")]
    NotFound(String),
    #[error("upload `{id}` is {status} and does not accept this operation")]
    InvalidState { id: String, status: String },
    #[error("offset mismatch: upload is at {expected}, request sent {actual}")]
    OffsetConflict { expected: i64, actual: i64 },
    #[error("{0}")]
    InvalidArgument(String),
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: i64, actual: i64 },
    #[error("upload is missing chunks {missing:?}")]
    IncompleteUpload { missing: Vec<i64> },
    #[error("requested range not satisfiable")]
    InvalidRange { file_size: u64 },
    #[error("could not resolve upload owner: {0}")]
    OwnerResolution(String),
    #[error(transparent)]
    Storage(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

impl UploadError {
    pub(crate) fn invalid_state(id: impl ToString, status: impl ToString) -> Self {
        UploadError::InvalidState {
            id: id.to_string(),
            status: status.to_string(),
        }
    }
}
