//! Streams finalized files, honouring a single `Range`.

use crate::{errors::AppError, state::AppState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};

/// `GET /uploads/{filename}`
///
/// 200 with the whole file, or 206 with `Content-Range` when a `Range`
/// header is present. Unsatisfiable ranges map to 416.
pub async fn stream_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let file = state.ranges.read_range(&filename, range).await?;

    let status = if file.range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let content_length = file.content_length();
    let content_range = file.content_range();
    let disposition = format!("inline; filename=\"{}\"", file.filename.replace('"', "'"));
    let content_type = file.content_type.clone();

    let mut response = Response::new(Body::from_stream(file.body));
    *response.status_mut() = status;

    let resp_headers = response.headers_mut();
    resp_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    resp_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        resp_headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_bytes(disposition.as_bytes()) {
        resp_headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(value) = content_range.and_then(|v| HeaderValue::from_str(&v).ok()) {
        resp_headers.insert(header::CONTENT_RANGE, value);
    }

    Ok(response)
}
