//! Per-key usage counters.
//!
//! Every encryption under a sequence key bumps that key's counter. The
//! counters are persisted with the shard, signed, and used to decide when
//! a key has reached its usage limit and must be rotated. Each counter
//! tracks a `current` value and the `committed` value last known to be
//! persisted, so counts recorded during a failed write can be merged into
//! a freshly loaded shard without double counting.

use std::collections::BTreeMap;

use crate::error::CryptoError;
use crate::verifier::Verifier;

/// Usage counters keyed by key sequence number.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    entries: BTreeMap<u32, Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    current: u64,
    committed: u64,
}

impl Counters {
    /// Create an empty counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a counter for a new key, starting at `start`.
    pub fn init(&mut self, seq: u32, start: u64) -> Result<(), CryptoError> {
        if self.entries.contains_key(&seq) {
            return Err(CryptoError::CounterExists(seq));
        }
        self.entries.insert(
            seq,
            Entry {
                current: start,
                committed: start,
            },
        );
        Ok(())
    }

    /// Record one use of the key, returning the new count.
    pub fn record(&mut self, seq: u32) -> Result<u64, CryptoError> {
        let entry = self
            .entries
            .get_mut(&seq)
            .ok_or(CryptoError::UnknownCounter(seq))?;
        entry.current += 1;
        Ok(entry.current)
    }

    /// Current count for a key, if it has a counter.
    pub fn get(&self, seq: u32) -> Option<u64> {
        self.entries.get(&seq).map(|entry| entry.current)
    }

    /// Mark all current counts as persisted.
    pub fn commit(&mut self) {
        for entry in self.entries.values_mut() {
            entry.committed = entry.current;
        }
    }

    /// Fold another counter set's uncommitted counts into this one.
    ///
    /// Only keys present on both sides are merged. The merged deltas are
    /// marked committed on `other`, so merging the same set again adds
    /// nothing.
    pub fn merge(&mut self, other: &mut Counters) {
        for (seq, entry) in &mut other.entries {
            if let Some(mine) = self.entries.get_mut(seq) {
                mine.current += entry.current - entry.committed;
                entry.committed = entry.current;
            }
        }
    }

    /// Serialize current counts and sign them.
    ///
    /// The payload is the big-endian `u64` count of each key in ascending
    /// sequence order. The key list itself is stored separately, so the
    /// payload carries only values.
    pub fn serialize(&self, verifier: &Verifier) -> String {
        let mut data = Vec::with_capacity(self.entries.len() * 8);
        for entry in self.entries.values() {
            data.extend_from_slice(&entry.current.to_be_bytes());
        }
        verifier.sign(&data)
    }

    /// Verify a signed payload and rebuild counters for the given keys.
    pub fn parse(signed: &str, seqs: &[u32], verifier: &Verifier) -> Result<Self, CryptoError> {
        let data = verifier.parse(signed)?;
        if data.len() != seqs.len() * 8 {
            return Err(CryptoError::CounterStateSize);
        }

        let mut entries = BTreeMap::new();
        for (seq, chunk) in seqs.iter().zip(data.chunks_exact(8)) {
            let value = u64::from_be_bytes(chunk.try_into().expect("chunk is 8 bytes"));
            entries.insert(
                *seq,
                Entry {
                    current: value,
                    committed: value,
                },
            );
        }
        Ok(Self { entries })
    }
}
