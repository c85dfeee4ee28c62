//! Logical path validation and sandboxed resolution under the storage root.
//!
//! Two independent guards live here. [`validate_logical_path`] is a cheap
//! structural pre-filter for caller input. [`normalize`] and [`resolve`] turn a
//! logical folder path into a concrete location and verify, after
//! canonicalization, that it never leaves the storage root.

use regex::Regex;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;

use crate::storage::StorageError;

static LOGICAL_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([A-Za-z0-9._-]+/?)*$").expect("logical path pattern is valid")
});

const WINDOWS_FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\'];

const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Structural pre-filter: an absolute-style path of `[A-Za-z0-9._-]` segments.
///
/// This only rejects malformed input early. It does not make a path safe;
/// [`resolve`] is still required before touching the filesystem.
pub fn validate_logical_path(path: &str) -> Result<(), StorageError> {
    if LOGICAL_PATH_REGEX.is_match(path) {
        Ok(())
    } else {
        Err(invalid(
            path,
            "expected '/'-separated segments of letters, digits, '.', '_' or '-'",
        ))
    }
}

/// Splits a logical path into validated segments.
///
/// Separators are trimmed and collapsed, so `"a//b/"` yields `["a", "b"]` and
/// a blank path yields no segments (the storage root).
pub fn normalize(logical_path: &str) -> Result<Vec<&str>, StorageError> {
    let segments: Vec<&str> = logical_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    for segment in &segments {
        check_segment(logical_path, segment)?;
        if cfg!(windows) {
            check_windows_segment(logical_path, segment)?;
        }
    }

    Ok(segments)
}

/// Maps `(root, logical_path, physical_filename)` to a path inside `root`.
///
/// Nothing is created on disk. The existing part of the joined path is
/// canonicalized and must descend from the canonical root, which catches
/// escapes that segment filtering alone would miss (symlinked directories,
/// case folding).
pub async fn resolve(
    root: &Path,
    logical_path: &str,
    physical_filename: &str,
) -> Result<PathBuf, StorageError> {
    let segments = normalize(logical_path)?;
    check_physical_filename(logical_path, physical_filename)?;

    let mut target = root.to_path_buf();
    target.extend(&segments);
    target.push(physical_filename);

    let canonical_root = fs::canonicalize(root).await?;
    let canonical_target = canonicalize_existing_prefix(&target).await?;
    if canonical_target.strip_prefix(&canonical_root).is_err() {
        return Err(invalid(logical_path, "path escapes the storage sandbox"));
    }

    Ok(target)
}

fn check_segment(path: &str, segment: &str) -> Result<(), StorageError> {
    if segment == "." || segment == ".." || segment.starts_with('.') {
        return Err(invalid(path, format!("unsafe path segment: {segment}")));
    }
    if segment.contains('\0') {
        return Err(invalid(path, "path segment contains a NUL byte"));
    }
    Ok(())
}

/// Windows filesystem restrictions, applied only on Windows targets.
fn check_windows_segment(path: &str, segment: &str) -> Result<(), StorageError> {
    if segment.contains(WINDOWS_FORBIDDEN_CHARS) {
        return Err(invalid(
            path,
            format!("forbidden characters in segment: {segment}"),
        ));
    }
    let upper = segment.to_ascii_uppercase();
    if WINDOWS_RESERVED_NAMES.contains(&upper.as_str()) {
        return Err(invalid(
            path,
            format!("reserved Windows device name: {segment}"),
        ));
    }
    Ok(())
}

fn check_physical_filename(path: &str, filename: &str) -> Result<(), StorageError> {
    if filename.is_empty() || filename.contains(['/', '\\']) {
        return Err(invalid(path, format!("invalid physical filename: {filename}")));
    }
    check_segment(path, filename)
}

/// Canonicalizes the deepest existing ancestor and re-appends the rest.
async fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf, StorageError> {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        match fs::canonicalize(&existing).await {
            Ok(mut canonical) => {
                canonical.extend(missing.iter().rev());
                return Ok(canonical);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let Some(name) = existing.file_name() else {
                    return Err(StorageError::Io(err));
                };
                missing.push(name.to_os_string());
                if !existing.pop() {
                    return Err(StorageError::Io(err));
                }
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
    }
}

fn invalid(path: &str, reason: impl Into<String>) -> StorageError {
    StorageError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}
