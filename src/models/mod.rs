//! Core data models for the resumable upload service.
//!
//! Ledger rows map to SQLite tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod asset;
pub mod chunk_upload;
pub mod metadata;
pub mod stream_upload;
pub mod upload_status;

pub use upload_status::UploadStatus;
