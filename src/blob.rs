//! The blob adapter contract: a flat path space of
//! string keys and string values with read/write/list/delete/exists.
//!
//! This module defines the trait the store engine depends on plus two
//! reference implementations used by this crate's own tests:
//! [`MemoryBlobAdapter`] (a locked `HashMap`) and [`FilesystemBlobAdapter`]
//! (`camino` UTF-8 paths over `tokio::fs`). Real backends (RocksDB,
//! IndexedDB, mobile file APIs, ...) are out of scope — only the contract
//! is.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use tokio::sync::RwLock;

use crate::error::BlobError;

/// Normalizes a path: strips leading/trailing slashes, rejects `..`
/// traversal and control characters.
pub fn normalize_path(path: &str) -> Result<String, BlobError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == ".." || segment == "." {
            return Err(BlobError::InvalidPath {
                path: path.to_string(),
            });
        }
    }
    if trimmed.chars().any(char::is_control) {
        return Err(BlobError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// The storage backend abstraction the CORE depends on.
#[async_trait]
pub trait BlobAdapter: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<String>, BlobError>;
    async fn write(&self, path: &str, value: &str) -> Result<(), BlobError>;

    /// Deletes the blob at `path`. Optional: the CORE must not depend on
    /// this for correctness, only for hard-deletion/tombstone GC (not
    /// implemented in this spec — see `DESIGN.md`). Returns `Ok(true)` if
    /// something was deleted, `Ok(false)` if it was already absent.
    async fn delete(&self, path: &str) -> Result<bool, BlobError>;

    async fn exists(&self, path: &str) -> Result<bool, BlobError>;

    /// First-level children of `directory` only, sorted lexicographically.
    async fn list(&self, directory: &str) -> Result<Vec<String>, BlobError>;
}

/// An in-memory [`BlobAdapter`], used by this crate's tests and suitable
/// for ephemeral/embedded callers that don't need persistence.
#[derive(Debug, Default)]
pub struct MemoryBlobAdapter {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryBlobAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobAdapter for MemoryBlobAdapter {
    async fn read(&self, path: &str) -> Result<Option<String>, BlobError> {
        let path = normalize_path(path)?;
        Ok(self.entries.read().await.get(&path).cloned())
    }

    async fn write(&self, path: &str, value: &str) -> Result<(), BlobError> {
        let path = normalize_path(path)?;
        self.entries.write().await.insert(path, value.to_string());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool, BlobError> {
        let path = normalize_path(path)?;
        Ok(self.entries.write().await.remove(&path).is_some())
    }

    async fn exists(&self, path: &str) -> Result<bool, BlobError> {
        let path = normalize_path(path)?;
        Ok(self.entries.read().await.contains_key(&path))
    }

    async fn list(&self, directory: &str) -> Result<Vec<String>, BlobError> {
        let prefix = normalize_path(directory)?;
        let full_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };

        let entries = self.entries.read().await;
        let mut children: Vec<String> = entries
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(&full_prefix)?;
                Some(rest.split('/').next().unwrap_or(rest).to_string())
            })
            .collect();
        children.sort_unstable();
        children.dedup();
        Ok(children)
    }
}

/// A filesystem-backed [`BlobAdapter`] rooted at a base directory. Values
/// are stored as UTF-8 files named after the (normalized) path.
#[derive(Debug)]
pub struct FilesystemBlobAdapter {
    root: Utf8PathBuf,
    lock: Arc<RwLock<()>>,
}

impl FilesystemBlobAdapter {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Arc::new(RwLock::new(())),
        }
    }

    fn full_path(&self, path: &str) -> Result<Utf8PathBuf, BlobError> {
        let normalized = normalize_path(path)?;
        Ok(self.root.join(normalized))
    }

    fn to_operation_failed(err: std::io::Error) -> BlobError {
        BlobError::OperationFailed {
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl BlobAdapter for FilesystemBlobAdapter {
    async fn read(&self, path: &str) -> Result<Option<String>, BlobError> {
        let full = self.full_path(path)?;
        let _guard = self.lock.read().await;
        match tokio::fs::read_to_string(&full).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::to_operation_failed(err)),
        }
    }

    async fn write(&self, path: &str, value: &str) -> Result<(), BlobError> {
        let full = self.full_path(path)?;
        let _guard = self.lock.write().await;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Self::to_operation_failed)?;
        }
        tokio::fs::write(&full, value)
            .await
            .map_err(Self::to_operation_failed)
    }

    async fn delete(&self, path: &str) -> Result<bool, BlobError> {
        let full = self.full_path(path)?;
        let _guard = self.lock.write().await;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Self::to_operation_failed(err)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, BlobError> {
        let full = self.full_path(path)?;
        let _guard = self.lock.read().await;
        Ok(tokio::fs::try_exists(&full).await.unwrap_or(false))
    }

    async fn list(&self, directory: &str) -> Result<Vec<String>, BlobError> {
        let full = self.full_path(directory)?;
        let _guard = self.lock.read().await;
        let mut read_dir = match tokio::fs::read_dir(&full).await {
            Ok(rd) => rd,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Self::to_operation_failed(err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(Self::to_operation_failed)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort_unstable();
        Ok(names)
    }
}
