//! tus 1.0 core protocol plus the creation and termination extensions.
//!
//! - OPTIONS /files[/{id}] -> capabilities
//! - POST    /files        -> create, 201 + Location
//! - HEAD    /files/{id}   -> current offset
//! - PATCH   /files/{id}   -> append at Upload-Offset
//! - DELETE  /files/{id}   -> terminate

use crate::{errors::AppError, state::AppState};
use axum::{
    body::Body,
    extract::{OriginalUri, Path, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;

pub const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const TUS_VERSION: HeaderName = HeaderName::from_static("tus-version");
pub const TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub const UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
pub const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
pub const UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");
pub const USER_ID: HeaderName = HeaderName::from_static("x-user-id");

const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";
const EXTENSIONS: &str = "creation,termination,metadata";

/// Rejects requests whose `Tus-Resumable` differs from ours (except
/// OPTIONS) and stamps `Tus-Resumable` on every response.
pub async fn tus_protocol(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let supported = state.tus_version.as_ref();
    let mut response = if request.method() == Method::OPTIONS
        || header_str(request.headers(), &TUS_RESUMABLE) == Some(supported)
    {
        next.run(request).await
    } else {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "Tus-Resumable header mismatch"
        );
        AppError::version_mismatch(supported).into_response()
    };

    if let Ok(value) = HeaderValue::from_str(supported) {
        response.headers_mut().insert(TUS_RESUMABLE, value);
    }
    response
}

/// `OPTIONS /files`
pub async fn options(State(state): State<AppState>) -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (TUS_VERSION, state.tus_version.to_string()),
            (TUS_EXTENSION, EXTENSIONS.to_string()),
        ],
    )
        .into_response()
}

/// `POST /files`
pub async fn create_upload(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let length = header_str(&headers, &UPLOAD_LENGTH)
        .ok_or_else(|| AppError::bad_request("Upload-Length header is required"))?
        .parse::<i64>()
        .map_err(|_| AppError::bad_request("Upload-Length must be an integer"))?;
    let metadata = header_str(&headers, &UPLOAD_METADATA);

    let upload_id = state.streams.create(length, metadata).await?;
    let location = format!("{}/{}", uri.path().trim_end_matches('/'), upload_id);

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (UPLOAD_OFFSET, "0".to_string()),
        ],
    )
        .into_response())
}

/// `HEAD /files/{id}`
pub async fn upload_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let info = state.streams.info(&id).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [
            (UPLOAD_OFFSET, info.offset.to_string()),
            (UPLOAD_LENGTH, info.length.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response())
}

/// `PATCH /files/{id}`: append the request body at `Upload-Offset`.
pub async fn append_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let content_type = header_str(&headers, &header::CONTENT_TYPE).unwrap_or_default();
    if !content_type.eq_ignore_ascii_case(OFFSET_OCTET_STREAM) {
        return Err(AppError::unsupported_media_type(OFFSET_OCTET_STREAM));
    }
    let offset = header_str(&headers, &UPLOAD_OFFSET)
        .ok_or_else(|| AppError::bad_request("Upload-Offset header is required"))?
        .parse::<i64>()
        .map_err(|_| AppError::bad_request("Upload-Offset must be an integer"))?;

    let content_length = header_str(&headers, &header::CONTENT_LENGTH)
        .map(|raw| raw.parse::<u64>())
        .transpose()
        .map_err(|_| AppError::bad_request("Content-Length must be an integer"))?;

    let owner = state.owners.resolve(header_str(&headers, &USER_ID)).await?;

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));
    let new_offset = state
        .streams
        .append(&id, offset, content_length, &owner, stream).await?;

    Ok((
        StatusCode::NO_CONTENT,
        [(UPLOAD_OFFSET, new_offset.to_string())],
    )
        .into_response())
}

/// `DELETE /files/{id}`
pub async fn terminate_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.streams.terminate(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}
