//! In-memory storage adapter.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use coffer_types::{Revision, ShardId, ShardRecord};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::Adapter;

/// In-memory adapter backed by a `Mutex<HashMap>`.
///
/// Useful for testing and for ephemeral stores. Revisions are per-key
/// counters, bumped on every successful write.
#[derive(Default)]
pub struct MemoryAdapter {
    shards: Mutex<HashMap<ShardId, Record>>,
}

struct Record {
    value: Bytes,
    rev: u64,
}

impl MemoryAdapter {
    /// Create an empty in-memory adapter.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Adapter for MemoryAdapter {
    async fn read(&self, id: &ShardId) -> Result<Option<ShardRecord>, StoreError> {
        let map = self.shards.lock().expect("adapter lock poisoned");
        Ok(map.get(id).map(|record| ShardRecord {
            value: record.value.clone(),
            rev: Revision::new(record.rev.to_string()),
        }))
    }

    async fn write(
        &self,
        id: &ShardId,
        value: Bytes,
        expected: Option<&Revision>,
    ) -> Result<Revision, StoreError> {
        let mut map = self.shards.lock().expect("adapter lock poisoned");

        let current = map.get(id).map(|record| record.rev);
        let matches = match (expected, current) {
            (None, None) => true,
            (Some(rev), Some(cur)) => rev.as_str() == cur.to_string(),
            _ => false,
        };
        if !matches {
            return Err(StoreError::Conflict);
        }

        let rev = current.unwrap_or(0) + 1;
        debug!(%id, rev, size = value.len(), "stored shard in memory");
        map.insert(id.clone(), Record { value, rev });

        Ok(Revision::new(rev.to_string()))
    }
}
