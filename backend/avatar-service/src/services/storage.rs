/// Blob storage for avatars
///
/// Key-addressed byte storage used both as the canonical store
/// (`avatars/{hash}`) and as the upload staging area
/// (`unconfirmed/{token}-{hash}`). Keys are paths relative to the storage
/// root; absolute paths pass through unchanged.
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Stored bytes plus the modification time used for `Last-Modified`
#[derive(Debug, Clone)]
pub struct Blob {
    pub data: Bytes,
    pub modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Load a blob; `Ok(None)` when nothing is stored under `key`
    async fn load(&self, key: &str) -> Result<Option<Blob>>;

    /// Write a blob, replacing any existing one
    async fn save(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Atomically move `from` to `to`, replacing `to` if present
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Name of the first entry in `dir` whose file name starts with `prefix`
    async fn find_by_prefix(&self, dir: &str, prefix: &str) -> Result<Option<String>>;

    /// Remove a blob; removing a missing blob is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Full location of a key, for logging
    fn full_name(&self, key: &str) -> String;
}

/// Blob store backed by the local file system
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the given directories below the root
    pub async fn ensure_dirs(&self, dirs: &[&str]) -> Result<()> {
        for dir in dirs {
            let path = self.path(dir);
            tokio::fs::create_dir_all(&path).await.map_err(|e| {
                AppError::Storage(format!("Failed to create {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    fn path(&self, key: &str) -> PathBuf {
        let key = Path::new(key);
        if key.is_absolute() {
            key.to_path_buf()
        } else {
            self.root.join(key)
        }
    }
}

#[async_trait]
impl BlobStore for FileStorage {
    async fn load(&self, key: &str) -> Result<Option<Blob>> {
        let path = self.path(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(Some(Blob {
            data: Bytes::from(data),
            modified,
        }))
    }

    async fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path(key);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write {}: {e}", path.display())))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (self.path(from), self.path(to));
        tokio::fs::rename(&from, &to).await.map_err(|e| {
            AppError::Storage(format!(
                "Failed to rename {} to {}: {e}",
                from.display(),
                to.display()
            ))
        })
    }

    async fn find_by_prefix(&self, dir: &str, prefix: &str) -> Result<Option<String>> {
        let path = self.path(dir);
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to list {}: {e}", path.display())))?;

        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    return Ok(Some(name.to_string()));
                }
            }
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))),
        }
    }

    fn full_name(&self, key: &str) -> String {
        self.path(key).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn storage() -> (TempDir, FileStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.ensure_dirs(&["avatars", "unconfirmed"]).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (_dir, storage) = storage().await;
        storage.save("avatars/abc", b"hello").await.unwrap();

        let blob = storage.load("avatars/abc").await.unwrap().unwrap();
        assert_eq!(&blob.data[..], b"hello");
        assert!(blob.modified.is_some());
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let (_dir, storage) = storage().await;
        assert!(storage.load("avatars/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_replaces_target() {
        let (_dir, storage) = storage().await;
        storage.save("avatars/abc", b"old").await.unwrap();
        storage.save("unconfirmed/tok-abc", b"new").await.unwrap();

        storage.rename("unconfirmed/tok-abc", "avatars/abc").await.unwrap();

        let blob = storage.load("avatars/abc").await.unwrap().unwrap();
        assert_eq!(&blob.data[..], b"new");
        assert!(storage.load("unconfirmed/tok-abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_missing_source_fails() {
        let (_dir, storage) = storage().await;
        assert!(matches!(
            storage.rename("unconfirmed/nope", "avatars/abc").await,
            Err(AppError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_find_by_prefix() {
        let (_dir, storage) = storage().await;
        storage.save("unconfirmed/aaaa-hash1", b"1").await.unwrap();
        storage.save("unconfirmed/bbbb-hash2", b"2").await.unwrap();

        assert_eq!(
            storage.find_by_prefix("unconfirmed", "bbbb-").await.unwrap(),
            Some("bbbb-hash2".to_string())
        );
        assert_eq!(
            storage.find_by_prefix("unconfirmed", "cccc-").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_absolute_keys_pass_through() {
        let (_dir, storage) = storage().await;
        let other = TempDir::new().unwrap();
        let file = other.path().join("default.png");
        let key = file.to_str().unwrap();

        storage.save(key, b"img").await.unwrap();
        assert!(file.exists());
        assert_eq!(storage.full_name(key), key);
        assert_eq!(
            &storage.load(key).await.unwrap().unwrap().data[..],
            b"img"
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, storage) = storage().await;
        storage.save("unconfirmed/t-h", b"x").await.unwrap();
        storage.delete("unconfirmed/t-h").await.unwrap();
        storage.delete("unconfirmed/t-h").await.unwrap();
        assert!(storage.load("unconfirmed/t-h").await.unwrap().is_none());
    }
}
