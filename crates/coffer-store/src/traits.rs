//! Core trait for revision-checked shard storage.

use bytes::Bytes;
use coffer_types::{Revision, ShardId, ShardRecord};

use crate::error::StoreError;

/// Trait for storing and retrieving shards with optimistic concurrency.
///
/// The adapter is the sole point of cross-process coordination: every write
/// presents the revision the writer last observed for the key, and the
/// adapter rejects the write with [`StoreError::Conflict`] when that revision
/// no longer matches. Presenting no revision (`None`) means "this key must
/// not exist yet".
///
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    /// Read a shard. Returns `None` if the key does not exist.
    async fn read(&self, id: &ShardId) -> Result<Option<ShardRecord>, StoreError>;

    /// Write a shard, guarded by the expected revision.
    ///
    /// Returns the new revision on success. Fails with
    /// [`StoreError::Conflict`] when `expected` does not match the currently
    /// stored revision.
    async fn write(
        &self,
        id: &ShardId,
        value: Bytes,
        expected: Option<&Revision>,
    ) -> Result<Revision, StoreError>;
}
