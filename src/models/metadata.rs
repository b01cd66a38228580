//! Client-supplied metadata carried by the `Upload-Metadata` header, plus the
//! filename rules shared by both upload modes.

use crate::services::error::{UploadError, UploadResult};
use base64::{Engine as _, engine::general_purpose};
use std::collections::BTreeMap;

const MAX_FILENAME_LEN: usize = 255;

/// Key/value pairs decoded from `Upload-Metadata`.
///
/// The header is a comma-separated list of `key base64(value)` pairs. A key
/// without a value decodes to an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMetadata {
    entries: BTreeMap<String, String>,
}

impl UploadMetadata {
    pub fn parse(header: Option<&str>) -> UploadResult<Self> {
        let mut entries = BTreeMap::new();
        let Some(header) = header.filter(|h| !h.trim().is_empty()) else {
            return Ok(Self { entries });
        };

        for pair in header.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let mut parts = pair.split_whitespace();
            let key = parts.next().unwrap_or_default();
            let value = match (parts.next(), parts.next()) {
                (None, _) => String::new(),
                (Some(encoded), None) => decode_value(key, encoded)?,
                (Some(_), Some(_)) => {
                    return Err(UploadError::InvalidArgument(format!(
                        "metadata entry `{}` has more than one value",
                        key
                    )));
                }
            };
            entries.insert(key.to_string(), value);
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn filename(&self) -> Option<&str> {
        self.get("filename").filter(|v| !v.is_empty())
    }

    pub fn filetype(&self) -> Option<&str> {
        self.get("filetype").filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn decode_value(key: &str, encoded: &str) -> UploadResult<String> {
    let bytes = general_purpose::STANDARD.decode(encoded).map_err(|_| {
        UploadError::InvalidArgument(format!("metadata value for `{}` is not base64", key))
    })?;
    String::from_utf8(bytes).map_err(|_| {
        UploadError::InvalidArgument(format!("metadata value for `{}` is not UTF-8", key))
    })
}

/// Reduce a client filename to a single safe path component.
///
/// Directory prefixes (either separator) are stripped. Rejects names that
/// end up empty, are `.`/`..`, contain control characters, or exceed 255 bytes.
pub fn sanitize_filename(raw: &str) -> UploadResult<String> {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        return Err(UploadError::InvalidArgument(format!(
            "filename `{}` is not usable",
            raw
        )));
    }
    if base.len() > MAX_FILENAME_LEN {
        return Err(UploadError::InvalidArgument("filename is too long".into()));
    }
    if base.chars().any(|c| c.is_control()) {
        return Err(UploadError::InvalidArgument(
            "filename contains control characters".into(),
        ));
    }
    Ok(base.to_string())
}
