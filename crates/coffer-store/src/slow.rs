//! Latency-injecting adapter wrapper for tests.
//!
//! Wraps any adapter and sleeps for a random duration drawn from a seeded
//! RNG before each read or write, so a given seed reproduces the same
//! interleaving of concurrent writers. Races that never show up against an
//! instant in-memory adapter surface here.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use coffer_types::{Revision, ShardId, ShardRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::StoreError;
use crate::traits::Adapter;

/// An [`Adapter`] wrapper that injects seeded random latency.
pub struct SlowAdapter {
    inner: Arc<dyn Adapter>,
    read_ms: (u64, u64),
    write_ms: (u64, u64),
    rng: Mutex<StdRng>,
}

impl SlowAdapter {
    /// Wrap an adapter. Latency defaults to zero; set ranges with the
    /// builder methods.
    pub fn new(inner: Arc<dyn Adapter>, seed: u64) -> Self {
        Self {
            inner,
            read_ms: (0, 0),
            write_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Uniform random sleep before each read, in milliseconds.
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.read_ms = (min_ms, max_ms);
        self
    }

    /// Uniform random sleep before each write, in milliseconds.
    pub fn write_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.write_ms = (min_ms, max_ms);
        self
    }

    async fn sleep((min_ms, max_ms): (u64, u64), rng: &Mutex<StdRng>) {
        if max_ms == 0 {
            return;
        }
        let ms = rng
            .lock()
            .expect("rng lock poisoned")
            .random_range(min_ms..=max_ms);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl Adapter for SlowAdapter {
    async fn read(&self, id: &ShardId) -> Result<Option<ShardRecord>, StoreError> {
        Self::sleep(self.read_ms, &self.rng).await;
        self.inner.read(id).await
    }

    async fn write(
        &self,
        id: &ShardId,
        value: Bytes,
        expected: Option<&Revision>,
    ) -> Result<Revision, StoreError> {
        Self::sleep(self.write_ms, &self.rng).await;
        self.inner.write(id, value, expected).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;

    fn make_adapter(seed: u64) -> SlowAdapter {
        SlowAdapter::new(Arc::new(MemoryAdapter::new()), seed)
    }

    #[tokio::test]
    async fn test_reads_and_writes_pass_through() {
        let adapter = make_adapter(7).read_latency(0, 2).write_latency(0, 2);
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
    async fn test_conflicts_pass_through() {
        let adapter = make_adapter(7).write_latency(0, 2);
        let id = ShardId::new("shard-00");

        adapter
            .write(&id, Bytes::from_static(b"one"), None)
            .await
            .unwrap();
        let result = adapter.write(&id, Bytes::from_static(b"two"), None).await;
        assert!(matches!(result, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn test_sleeps_at_least_the_configured_minimum() {
        let adapter = make_adapter(7).read_latency(10, 10);
        let started = std::time::Instant::now();
        adapter.read(&ShardId::new("shard-00")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));
    }
}
