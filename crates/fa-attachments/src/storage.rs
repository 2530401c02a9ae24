//! Filesystem placement for resolved attachment paths
//!
//! A [`DiskStore`] performs the writes, deletes and directory creation for
//! one storage root; the engine holds one store per root (public and
//! private). Writes go to a temporary sibling first and are renamed into
//! place, so a failed write never leaves a partial file under the final
//! name.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument};

use crate::path::FilePath;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Filesystem store rooted at one directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path a versioned file would occupy under this root
    pub fn absolute(&self, file: &FilePath, version: Option<&str>) -> PathBuf {
        self.root.join(file.relative(version))
    }

    /// Recursive directory creation, idempotent.
    pub async fn ensure_dir(&self, rel_dir: &str) -> Result<(), StorageError> {
        let dir = self.root.join(rel_dir);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::CreateDir { path: dir, source })
    }

    /// Write a file under this root at the given version slot.
    ///
    /// The destination directory tree is created if absent; the content is
    /// written to a `.part` sibling and renamed into place, with 0o664
    /// permission bits on Unix. Returns the absolute destination path.
    #[instrument(skip(self, file, data), fields(root = %self.root.display()))]
    pub async fn write(
        &self,
        file: &FilePath,
        version: Option<&str>,
        data: &[u8],
    ) -> Result<PathBuf, StorageError> {
        self.ensure_dir(file.dir()).await?;

        let dest = self.root.join(file.relative(version));
        // The temp name shares the file_id prefix, so a stale partial is
        // swept up by delete_all_versions like any other version file.
        let tmp = self.root.join(format!("{}.part", file.relative(version)));

        fs::write(&tmp, data)
            .await
            .map_err(|source| StorageError::Write {
                path: tmp.clone(),
                source,
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o664))
                .await
                .map_err(|source| StorageError::Write {
                    path: tmp.clone(),
                    source,
                })?;
        }

        fs::rename(&tmp, &dest)
            .await
            .map_err(|source| StorageError::Write {
                path: dest.clone(),
                source,
            })?;

        debug!(path = %dest.display(), bytes = data.len(), "file stored");
        Ok(dest)
    }

    /// Delete every file whose name starts with the id's `file_id` under
    /// `{root}/{dir}` — the unversioned original, every version, any
    /// extension. A missing directory or zero matches is a no-op; returns
    /// the number of files removed.
    pub async fn delete_all_versions(&self, file: &FilePath) -> Result<usize, StorageError> {
        let dir = self.root.join(file.dir());

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(StorageError::ReadDir { path: dir, source }),
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => return Err(StorageError::ReadDir { path: dir, source }),
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(file.file_id()) {
                continue;
            }
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            fs::remove_file(&path)
                .await
                .map_err(|source| StorageError::Delete {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), "attachment version deleted");
            removed += 1;
        }

        Ok(removed)
    }

    /// Check whether a versioned file exists under this root
    pub async fn exists(&self, file: &FilePath, version: Option<&str>) -> bool {
        fs::try_exists(self.absolute(file, version))
            .await
            .unwrap_or(false)
    }
}
