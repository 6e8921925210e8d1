//! Reference image files, one per registered face.

use crate::registry::FaceId;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create image directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to remove {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

/// Directory of reference images named `<id>.jpg`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Open the store, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::CreateDir { path: dir.clone(), source })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the reference image for `id` lives.
    pub fn path_for(&self, id: &FaceId) -> PathBuf {
        self.dir.join(format!("{}.jpg", id.as_str()))
    }

    /// Write `bytes` to `path`, overwriting anything already there.
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        tokio::fs::write(path, bytes)
            .await
            .map_err(|source| StoreError::Write { path: path.to_path_buf(), source })
    }

    /// Swap the contents of `path` for `bytes` via a sibling temp file, so a
    /// failed write never leaves a truncated image behind.
    pub async fn replace(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let staging = path.with_extension("tmp");
        if let Err(e) = self.write(&staging, bytes).await {
            self.discard(&staging).await;
            return Err(e);
        }

        if let Err(source) = tokio::fs::rename(&staging, path).await {
            self.discard(&staging).await;
            return Err(StoreError::Write { path: path.to_path_buf(), source });
        }
        Ok(())
    }

    /// Delete `path`. Returns `false` when the file was already gone.
    pub async fn remove(&self, path: &Path) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Remove { path: path.to_path_buf(), source }),
        }
    }

    /// Best-effort removal of a file that never became a record.
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = self.remove(path).await {
            tracing::warn!(error = %e, "failed to discard rejected upload");
        }
    }
}
