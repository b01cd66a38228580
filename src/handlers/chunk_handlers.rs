//! Chunk-indexed upload endpoints under `/uploads`.

use crate::{
    errors::AppError,
    services::chunk_coordinator::ChunkUploadStatus,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use uuid::Uuid;

/// Body of `POST /uploads`. Accepts snake_case or camelCase field names.
#[derive(Debug, Deserialize)]
pub struct InitUploadReq {
    pub filename: String,
    #[serde(default, alias = "contentType")]
    pub content_type: Option<String>,
    #[serde(alias = "totalSize")]
    pub total_size: i64,
    #[serde(alias = "chunkSize")]
    pub chunk_size: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitUploadResp {
    pub upload_id: Uuid,
    pub total_chunks: i64,
}

/// `POST /uploads`
pub async fn init_upload(
    State(state): State<AppState>,
    Json(req): Json<InitUploadReq>,
) -> Result<impl IntoResponse, AppError> {
    let upload = state
        .chunks
        .init(
            &req.filename,
            req.content_type.as_deref(),
            req.total_size,
            req.chunk_size,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitUploadResp {
            upload_id: upload.id,
            total_chunks: upload.total_chunks,
        }),
    ))
}

/// `PUT /uploads/{id}/chunks/{idx}`
///
/// Optional `X-Chunk-Size` is checked against the bytes received;
/// `X-Chunk-Checksum` is stored as given.
pub async fn put_chunk(
    State(state): State<AppState>,
    Path((upload_id, idx)): Path<(Uuid, i64)>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, AppError> {
    let declared_size = match headers.get("x-chunk-size") {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .ok_or_else(|| AppError::bad_request("X-Chunk-Size must be an integer"))?,
        ),
        None => None,
    };
    let checksum = headers
        .get("x-chunk-checksum")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    state
        .chunks
        .put_chunk(upload_id, idx, stream, declared_size, checksum)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /uploads/{id}/status`
pub async fn upload_status(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> Result<Json<ChunkUploadStatus>, AppError> {
    Ok(Json(state.chunks.status(upload_id).await?))
}

/// `POST /uploads/{id}/commit`
pub async fn commit_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.chunks.commit(upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /uploads/{id}`
pub async fn cancel_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.chunks.cancel(upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
