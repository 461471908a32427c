//! File-based storage adapter.
//!
//! Stores one file per shard id under a base directory. The revision token
//! is the blake3 hash of the file content, so a revision check compares the
//! bytes a writer last saw against the bytes currently on disk.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use coffer_types::{Revision, ShardId, ShardRecord};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::Adapter;

/// File-based adapter with compare-and-swap writes.
///
/// Writes take an exclusive `.lock` file next to the target, re-read the
/// current content to check the expected revision, then rename the lock file
/// into place. The rename makes the write atomic; the exclusive lock file
/// serializes writers on the same host, and a second writer finding the lock
/// present fails with [`StoreError::Conflict`] rather than blocking.
pub struct FileAdapter {
    base_dir: PathBuf,
}

impl FileAdapter {
    /// Create a file adapter rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn shard_path(&self, id: &ShardId) -> PathBuf {
        self.base_dir.join(id.as_str())
    }

    fn content_rev(value: &[u8]) -> Revision {
        Revision::new(blake3::hash(value).to_hex().to_string())
    }
}

#[async_trait::async_trait]
impl Adapter for FileAdapter {
    async fn read(&self, id: &ShardId) -> Result<Option<ShardRecord>, StoreError> {
        let path = self.shard_path(id);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                let rev = Self::content_rev(&data);
                Ok(Some(ShardRecord {
                    value: Bytes::from(data),
                    rev,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write(
        &self,
        id: &ShardId,
        value: Bytes,
        expected: Option<&Revision>,
    ) -> Result<Revision, StoreError> {
        let path = self.shard_path(id);
        let lock_path = path.with_extension("lock");

        // An existing lock file means another writer is mid-flight; surface
        // that as a conflict so the caller reloads and retries.
        let lock_file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Conflict);
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        // The lock file must be gone on every failure path; a leftover lock
        // turns all later writes of this shard into permanent conflicts.
        let result = self
            .commit_locked(id, lock_file, &lock_path, &path, &value, expected)
            .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&lock_path).await;
        }
        result
    }
}

impl FileAdapter {
    async fn commit_locked(
        &self,
        id: &ShardId,
        mut lock_file: tokio::fs::File,
        lock_path: &Path,
        path: &Path,
        value: &Bytes,
        expected: Option<&Revision>,
    ) -> Result<Revision, StoreError> {
        let current = self.read(id).await?;
        let matches = match (&expected, &current) {
            (None, None) => true,
            (Some(rev), Some(record)) => **rev == record.rev,
            _ => false,
        };
        if !matches {
            return Err(StoreError::Conflict);
        }

        lock_file.write_all(value).await?;
        lock_file.flush().await?;
        drop(lock_file);
        tokio::fs::rename(lock_path, path).await?;

        debug!(%id, path = %path.display(), size = value.len(), "stored shard to file");
        Ok(Self::content_rev(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_adapter() -> (FileAdapter, TempDir) {
        let dir = TempDir::new().unwrap();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        (adapter, dir)
    }

    #[tokio::test]
    async fn test_read_missing_returns_none() {
        let (adapter, _dir) = make_adapter();
        assert!(adapter.read(&ShardId::new("x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let (adapter, _dir) = make_adapter();
        let id = ShardId::new("shard-00");

        let rev = adapter
            .write(&id, Bytes::from_static(b"one"), None)
            .await
            .unwrap();

        let record = adapter.read(&id).await.unwrap().unwrap();
        assert_eq!(record.value, Bytes::from_static(b"one"));
        assert_eq!(record.rev, rev);
    }

    #[tokio::test]
    async fn test_revision_tracks_content() {
        let (adapter, _dir) = make_adapter();
        let id = ShardId::new("shard-00");

        let r1 = adapter
            .write(&id, Bytes::from_static(b"one"), None)
            .await
            .unwrap();
        let r2 = adapter
            .write(&id, Bytes::from_static(b"two"), Some(&r1))
            .await
            .unwrap();
        assert_ne!(r1, r2);
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let (adapter, _dir) = make_adapter();
        let id = ShardId::new("shard-00");

        let r1 = adapter
            .write(&id, Bytes::from_static(b"one"), None)
            .await
            .unwrap();
        adapter
            .write(&id, Bytes::from_static(b"two"), Some(&r1))
            .await
            .unwrap();

        let result = adapter
            .write(&id, Bytes::from_static(b"three"), Some(&r1))
            .await;
        assert!(matches!(result, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn test_create_existing_key_conflicts() {
        let (adapter, _dir) = make_adapter();
        let id = ShardId::new("shard-00");

        adapter
            .write(&id, Bytes::from_static(b"one"), None)
            .await
            .unwrap();
        let result = adapter.write(&id, Bytes::from_static(b"two"), None).await;
        assert!(matches!(result, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn test_held_lock_file_conflicts() {
        let (adapter, dir) = make_adapter();
        let id = ShardId::new("shard-00");

        // Simulate another writer mid-flight by pre-creating the lock file.
        std::fs::write(dir.path().join("shard-00.lock"), b"").unwrap();

        let result = adapter.write(&id, Bytes::from_static(b"one"), None).await;
        assert!(matches!(result, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn test_no_lock_file_left_after_write() {
        let (adapter, dir) = make_adapter();
        let id = ShardId::new("shard-00");

        adapter
            .write(&id, Bytes::from_static(b"one"), None)
            .await
            .unwrap();
        assert!(!dir.path().join("shard-00.lock").exists());
    }

    #[tokio::test]
    async fn test_failed_write_releases_the_lock_file() {
        let (adapter, dir) = make_adapter();
        let id = ShardId::new("shard-00");

        // A directory at the target path makes the write fail with an IO
        // error instead of a conflict.
        std::fs::create_dir(dir.path().join("shard-00")).unwrap();
        let result = adapter.write(&id, Bytes::from_static(b"one"), None).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(!dir.path().join("shard-00.lock").exists());

        // With the obstruction gone, the next attempt goes through instead
        // of conflicting against a leftover lock.
        std::fs::remove_dir(dir.path().join("shard-00")).unwrap();
        adapter
            .write(&id, Bytes::from_static(b"one"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_lock_file_left_after_conflict() {
        let (adapter, dir) = make_adapter();
        let id = ShardId::new("shard-00");

        adapter
            .write(&id, Bytes::from_static(b"one"), None)
            .await
            .unwrap();
        let _ = adapter.write(&id, Bytes::from_static(b"two"), None).await;
        assert!(!dir.path().join("shard-00.lock").exists());
    }
}
