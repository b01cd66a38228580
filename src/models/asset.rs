//! Durable artifact produced when a stream upload is finalized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Broad content family, used for the final storage path and for deciding
/// which downstream queues receive the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentCategory {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl ContentCategory {
    /// Classify a MIME type. Unknown or absent types map to `Other`.
    pub fn from_mime(mime: Option<&str>) -> Self {
        let Some(mime) = mime.map(str::trim).filter(|m| !m.is_empty()) else {
            return ContentCategory::Other;
        };
        let mime = mime.to_ascii_lowercase();
        if mime.starts_with("image/") {
            ContentCategory::Image
        } else if mime.starts_with("video/") {
            ContentCategory::Video
        } else if mime.starts_with("audio/") {
            ContentCategory::Audio
        } else if mime.contains("pdf") || mime.contains("document") || mime == "text/plain" {
            ContentCategory::Document
        } else {
            ContentCategory::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentCategory::Image => "IMAGE",
            ContentCategory::Video => "VIDEO",
            ContentCategory::Audio => "AUDIO",
            ContentCategory::Document => "DOCUMENT",
            ContentCategory::Other => "OTHER",
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized file and its bookkeeping row.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Asset {
    /// Same value as the stream upload id it came from.
    pub id: String,

    pub owner_id: String,

    pub category: ContentCategory,

    /// Durable path of the original bytes.
    pub original_path: String,

    pub original_filename: String,

    pub content_type: Option<String>,

    /// Hex MD5 of the full content.
    pub checksum: String,

    pub size_bytes: i64,

    pub created_at: DateTime<Utc>,
}
