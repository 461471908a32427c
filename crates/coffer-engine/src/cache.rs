//! Per-shard staging cache over a storage adapter.
//!
//! The cache holds the decrypted shard object and the last revision seen
//! for every shard this process has touched. Concurrent reads of an
//! uncached shard coalesce into a single adapter fetch. Writes use the
//! adapter's compare-and-swap; on conflict the entry is discarded, the
//! authoritative copy is reloaded, and the stale object's uncommitted key
//! usage counters are folded into it so anti-replay accounting survives
//! the retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use coffer_crypto::{Cipher, Verifier};
use coffer_shard::{Shard, ShardError};
use coffer_store::{Adapter, StoreError};
use coffer_types::{Revision, ShardId};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::EngineError;

struct CacheRecord {
    shard: Arc<Shard>,
    rev: Mutex<Option<Revision>>,
}

type Entry = Arc<OnceCell<CacheRecord>>;

/// Process-lifetime cache of decrypted shards with optimistic writes.
pub struct ShardCache {
    adapter: Arc<dyn Adapter>,
    cipher: Arc<dyn Cipher>,
    verifier: Arc<Verifier>,
    shards: Mutex<HashMap<ShardId, Entry>>,
}

impl ShardCache {
    pub fn new(adapter: Arc<dyn Adapter>, cipher: Arc<dyn Cipher>, verifier: Arc<Verifier>) -> Self {
        Self {
            adapter,
            cipher,
            verifier,
            shards: Mutex::new(HashMap::new()),
        }
    }

    /// The cached shard object, fetching and decrypting it if needed.
    ///
    /// A shard absent from the store is materialized as a fresh empty
    /// shard with no revision, so its first write is a create. Fetch
    /// failures are not cached; the next read retries from scratch.
    pub async fn read(&self, id: &ShardId) -> Result<Arc<Shard>, EngineError> {
        let entry = self.entry(id);

        let result = entry
            .get_or_try_init(|| self.fetch(id))
            .await
            .map(|record| record.shard.clone());

        if result.is_err() {
            self.evict(id, &entry);
        }
        result
    }

    /// Write the cached shard back with a compare-and-swap on its last
    /// known revision.
    ///
    /// On conflict: evict, reload the winner's copy, merge the stale
    /// object's uncommitted counters into it, and report
    /// [`EngineError::Conflict`] so the caller replans. Other errors leave
    /// the cache intact so staged mutations are not lost.
    pub async fn write(&self, id: &ShardId) -> Result<(), EngineError> {
        let entry = self
            .shards
            .lock()
            .expect("cache lock poisoned")
            .get(id)
            .cloned()
            .expect("writing a shard that was never read");
        let record = entry.get().expect("writing a shard still being fetched");

        let value = Bytes::from(record.shard.serialize()?);
        let expected = record.rev.lock().expect("revision lock poisoned").clone();

        match self.adapter.write(id, value, expected.as_ref()).await {
            Ok(rev) => {
                *record.rev.lock().expect("revision lock poisoned") = Some(rev);
                record.shard.commit_counters();
                debug!(%id, "wrote shard");
                Ok(())
            }
            Err(StoreError::Conflict) => {
                warn!(%id, "write conflict, reloading shard");
                self.evict(id, &entry);
                let fresh = self.read(id).await?;
                fresh.merge_counters(&record.shard);
                Err(EngineError::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn entry(&self, id: &ShardId) -> Entry {
        self.shards
            .lock()
            .expect("cache lock poisoned")
            .entry(id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    // Remove the entry only if it is still the one we worked with, so a
    // concurrent replacement is not thrown away.
    fn evict(&self, id: &ShardId, entry: &Entry) {
        let mut shards = self.shards.lock().expect("cache lock poisoned");
        if let Some(current) = shards.get(id) {
            if Arc::ptr_eq(current, entry) {
                shards.remove(id);
            }
        }
    }

    async fn fetch(&self, id: &ShardId) -> Result<CacheRecord, EngineError> {
        match self.adapter.read(id).await {
            Ok(Some(record)) => {
                let text = std::str::from_utf8(&record.value)
                    .map_err(|_| ShardError::Malformed("shard is not valid utf-8"))
                    .map_err(EngineError::from)?;
                let shard = Shard::parse(text, self.cipher.clone(), self.verifier.clone())
                    .map_err(EngineError::from)?;
                debug!(%id, rev = %record.rev, "fetched shard");
                Ok(CacheRecord {
                    shard: Arc::new(shard),
                    rev: Mutex::new(Some(record.rev)),
                })
            }
            Ok(None) => {
                debug!(%id, "shard not found, starting empty");
                Ok(CacheRecord {
                    shard: Arc::new(Shard::new(self.cipher.clone(), self.verifier.clone())),
                    rev: Mutex::new(None),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
