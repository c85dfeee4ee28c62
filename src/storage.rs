use std::io;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs::{self, File};
use tracing::{debug, info, warn};

use crate::atomic::{AtomicFile, is_temp_name};
use crate::sandbox;

/// Physical byte storage rooted at a single directory.
///
/// Callers resolve paths through [`Storage::resolve`] first; every other
/// operation still refuses paths outside the root.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Creates the root directory if it does not exist yet.
    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Resolves a logical folder path and physical filename inside the root.
    pub async fn resolve(
        &self,
        logical_path: &str,
        physical_filename: &str,
    ) -> Result<PathBuf, StorageError> {
        sandbox::resolve(&self.root, logical_path, physical_filename).await
    }

    /// Writes `bytes` to `path`, creating missing parent directories.
    ///
    /// Content lands in a temporary sibling first and is renamed into place,
    /// so a failed write never leaves a partial file at `path`.
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        self.ensure_within_root(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        AtomicFile::write(path, bytes).await?;
        debug!(path = ?path, size = bytes.len(), "physical file written");
        Ok(())
    }

    /// Opens a stored file for reading and returns it with its length.
    pub async fn open(&self, path: &Path) -> Result<(File, u64), StorageError> {
        self.ensure_within_root(path)?;
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_path_buf()));
            }
            Err(err) => return Err(StorageError::Io(err)),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }
        Ok((file, metadata.len()))
    }

    /// `true` only for a regular file; directories do not count.
    pub async fn exists(&self, path: &Path) -> Result<bool, StorageError> {
        self.ensure_within_root(path)?;
        match fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Removes a stored file. Returns `false` when it was already absent.
    pub async fn delete(&self, path: &Path) -> Result<bool, StorageError> {
        self.ensure_within_root(path)?;
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = ?path, "physical file removed");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Removes temporary write files older than `ttl` anywhere under the root.
    ///
    /// They only survive when a write was interrupted by a crash. Symlinks are
    /// not followed. Returns the number of files removed.
    pub async fn remove_stale_temp_files(&self, ttl: Duration) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                if !file_type.is_file() || !is_temp_name(&entry.file_name().to_string_lossy()) {
                    continue;
                }
                let age = match entry.metadata().await?.modified() {
                    Ok(modified) => now.duration_since(modified).unwrap_or_default(),
                    Err(_) => continue,
                };
                if age < ttl {
                    continue;
                }
                let path = entry.path();
                match fs::remove_file(&path).await {
                    Ok(()) => {
                        info!(path = ?path, "removed stale temp file");
                        removed += 1;
                    }
                    Err(err) => warn!(path = ?path, error = %err, "failed to remove stale temp file"),
                }
            }
        }

        Ok(removed)
    }

    fn ensure_within_root(&self, path: &Path) -> Result<(), StorageError> {
        match path.strip_prefix(&self.root) {
            Ok(relative) if !relative.as_os_str().is_empty() => Ok(()),
            _ => Err(StorageError::InvalidPath {
                path: path.display().to_string(),
                reason: "path is outside the storage root".into(),
            }),
        }
    }
}

/// Failures of the physical store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("path '{path}' is not valid: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}
