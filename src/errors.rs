use crate::services::error::UploadError;
use axum::{
    Json,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// HTTP-facing error: a status, a stable machine-readable code and a
/// message safe to show to clients.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// Chunk indices still outstanding, for `incomplete_upload`.
    pub missing: Option<Vec<i64>>,
    pub headers: HeaderMap,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
            missing: None,
            headers: HeaderMap::new(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_argument", msg)
    }

    /// 412 for a client speaking a protocol version we do not.
    pub fn version_mismatch(supported: &str) -> Self {
        Self::new(
            StatusCode::PRECONDITION_FAILED,
            "version_mismatch",
            format!("unsupported Tus-Resumable version, this server speaks {}", supported),
        )
        .with_header(HeaderName::from_static("tus-version"), supported)
    }

    pub fn unsupported_media_type(expected: &str) -> Self {
        Self::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            format!("Content-Type must be {}", expected),
        )
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16()
        });
        if let Some(missing) = self.missing {
            body["missing"] = json!(missing);
        }

        let mut response = (self.status, Json(body)).into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::NotFound(_) => AppError::not_found(err.to_string()),
            UploadError::InvalidState { .. } => {
                AppError::new(StatusCode::GONE, "invalid_state", err.to_string())
            }
            UploadError::OffsetConflict { .. } => {
                AppError::new(StatusCode::CONFLICT, "offset_conflict", err.to_string())
            }
            UploadError::InvalidArgument(_) => AppError::bad_request(err.to_string()),
            UploadError::SizeMismatch { .. } => AppError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "size_mismatch",
                err.to_string(),
            ),
            UploadError::IncompleteUpload { ref missing } => {
                let missing = missing.clone();
                let mut app =
                    AppError::new(StatusCode::CONFLICT, "incomplete_upload", err.to_string());
                app.missing = Some(missing);
                app
            }
            UploadError::InvalidRange { file_size } => AppError::new(
                StatusCode::RANGE_NOT_SATISFIABLE,
                "invalid_range",
                err.to_string(),
            )
            .with_header(header::CONTENT_RANGE, &format!("bytes */{}", file_size)),
            UploadError::OwnerResolution(_) => {
                AppError::new(StatusCode::UNAUTHORIZED, "owner_unresolved", err.to_string())
            }
            UploadError::Storage(ref inner) => {
                tracing::error!(error = %inner, "storage failure");
                AppError::internal("storage failure")
            }
            UploadError::Database(ref inner) => {
                tracing::error!(error = %inner, "database failure");
                AppError::internal("storage failure")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "unhandled failure");
        AppError::internal("internal error")
    }
}
