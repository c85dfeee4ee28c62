//! Write-to-temp-then-rename helper for files that must never be seen half written.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// A hidden temporary file next to its target, renamed over it on finalize.
///
/// The temporary name starts with a dot; hidden segments are never accepted
/// from callers, so no logical path can address it.
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

/// Whether `name` looks like a temporary file left by [`AtomicFile`].
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(".tmp.")
}

impl AtomicFile {
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory")
        })?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_path = parent.join(format!(".{base}.tmp.{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    /// Replaces `target` with `bytes` in one step.
    pub async fn write(target: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut atomic = Self::new(target).await?;
        if let Err(err) = atomic.file.write_all(bytes).await {
            atomic.cleanup().await;
            return Err(err);
        }
        atomic.finalize().await
    }

    /// Drops the temporary file without touching the target.
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// Flushes to disk and renames over the target.
    pub async fn finalize(mut self) -> io::Result<()> {
        let synced = match self.file.flush().await {
            Ok(()) => self.file.sync_all().await,
            Err(err) => Err(err),
        };
        if let Err(err) = synced {
            self.cleanup().await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok() {
                    if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
                        let _ = fs::remove_file(&self.temp_path).await;
                        return Err(err);
                    }
                    return sync_parent(&self.target).await;
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        sync_parent(&self.target).await
    }
}

async fn sync_parent(target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        let _ = sync_dir(parent).await;
    }
    Ok(())
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
