//! The metadata record kept for every stored file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::service::FileItemError;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
const MAX_FILENAME_LEN: usize = 255;
const MAX_EXTENSION_LEN: usize = 10;

/// Metadata describing one stored file.
///
/// `file_path` is the logical folder the caller chose; the file itself lives
/// at `<storage root>/<file_path>/<physical_filename()>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    /// Display name; `None` means the original filename is shown.
    pub filename: Option<String>,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: u64,
    pub mime_type: String,
    pub file_extension: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while the physical write is unconfirmed; cleared once the bytes
    /// are on disk. Records without the field load as stored.
    #[serde(default)]
    pub pending: bool,
}

impl FileRecord {
    /// Server-generated on-disk name: `<id>.<extension>` or just `<id>`.
    pub fn physical_filename(&self) -> String {
        if self.file_extension.is_empty() {
            self.id.to_string()
        } else {
            format!("{}.{}", self.id, self.file_extension)
        }
    }

    /// Name offered to downloaders: the display name, else the original.
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or(&self.original_filename)
    }

    /// Sets the display name from a caller-supplied stem, keeping the extension.
    pub fn rename(&mut self, stem: &str) -> Result<(), FileItemError> {
        self.filename = Some(display_filename(stem, &self.file_extension)?);
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Lower-cased extension of the original filename, or an empty string.
pub fn derive_extension(original_filename: &str) -> Result<String, FileItemError> {
    let extension = Path::new(original_filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if extension.len() > MAX_EXTENSION_LEN
        || !extension
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(invalid_input(
            "file",
            format!("unsupported file extension '{extension}'"),
        ));
    }
    Ok(extension)
}

/// Checks the uploader-supplied name before it is stored.
pub fn validate_original_filename(name: &str) -> Result<(), FileItemError> {
    if name.trim().is_empty() {
        return Err(invalid_input("file", "original filename is required"));
    }
    if name.chars().count() > MAX_FILENAME_LEN {
        return Err(invalid_input("file", "original filename is too long"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid_input(
            "file",
            "original filename contains control characters",
        ));
    }
    Ok(())
}

/// Builds `<stem>.<extension>` from a validated display stem.
pub fn display_filename(stem: &str, extension: &str) -> Result<String, FileItemError> {
    let stem = stem.trim();
    if stem.is_empty() {
        return Err(invalid_input("filename", "display name must not be empty"));
    }
    if stem.contains(['/', '\\']) || stem.chars().any(char::is_control) {
        return Err(invalid_input(
            "filename",
            "display name contains forbidden characters",
        ));
    }

    let name = if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{extension}")
    };
    if name.chars().count() > MAX_FILENAME_LEN {
        return Err(invalid_input("filename", "display name is too long"));
    }
    Ok(name)
}

/// Content type hint from the upload, falling back to octet-stream.
pub fn normalize_mime_type(content_type: Option<&str>) -> String {
    content_type
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .filter(|value| axum::http::HeaderValue::from_str(value).is_ok())
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

fn invalid_input(field: &'static str, reason: impl Into<String>) -> FileItemError {
    FileItemError::InvalidInput {
        field,
        reason: reason.into(),
    }
}
