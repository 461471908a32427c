//! Rotating key sequences.
//!
//! A [`KeySequenceCipher`] encrypts with a sequence of AES keys, minting a
//! new key once the newest one reaches its usage limit. AES-GCM with random
//! nonces degrades as a key is reused, so rotation keeps every key well
//! under the safe bound. Each ciphertext is prefixed with the sequence
//! number of the key that produced it, and the whole sequence is persisted
//! wrapped under a root cipher, next to signed usage counters.

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cipher::{Aes256GcmCipher, Cipher};
use crate::counters::Counters;
use crate::error::CryptoError;
use crate::verifier::Verifier;

/// Default number of encryptions allowed per key before rotation.
pub const KEY_USAGE_LIMIT: u64 = 1 << 30;

/// Persisted form of a key sequence: wrapped keys plus signed counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherState {
    /// One entry per key: `base64(seq || root-encrypted key bytes)`.
    pub keys: Vec<String>,
    /// Signed usage counters, one per key, in sequence order.
    pub counters: String,
}

struct KeyEntry {
    seq: u32,
    cipher: Aes256GcmCipher,
    // Cached persisted form. Cleared only for keys minted since the last
    // serialize, so unchanged keys keep a stable representation.
    wrapped: Option<String>,
}

struct Inner {
    keys: Vec<KeyEntry>,
    counters: Counters,
}

/// A cipher backed by a rotating sequence of AES-256-GCM keys.
pub struct KeySequenceCipher {
    root: Arc<dyn Cipher>,
    verifier: Arc<Verifier>,
    limit: u64,
    inner: Mutex<Inner>,
}

impl KeySequenceCipher {
    /// Create an empty sequence. The first key is minted on first use.
    pub fn new(root: Arc<dyn Cipher>, verifier: Arc<Verifier>) -> Self {
        Self {
            root,
            verifier,
            limit: KEY_USAGE_LIMIT,
            inner: Mutex::new(Inner {
                keys: Vec::new(),
                counters: Counters::new(),
            }),
        }
    }

    /// Override the per-key usage limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Rebuild a sequence from its persisted state.
    pub fn parse(
        state: &CipherState,
        root: Arc<dyn Cipher>,
        verifier: Arc<Verifier>,
    ) -> Result<Self, CryptoError> {
        let mut keys = Vec::with_capacity(state.keys.len());
        let mut seqs = Vec::with_capacity(state.keys.len());

        for wrapped in &state.keys {
            let payload = B64
                .decode(wrapped)
                .map_err(|_| CryptoError::Malformed("bad wrapped key encoding"))?;
            if payload.len() < 4 {
                return Err(CryptoError::Malformed("wrapped key too short"));
            }
            let (seq_bytes, encrypted) = payload.split_at(4);
            let seq = u32::from_be_bytes(seq_bytes.try_into().expect("split at 4"));

            let key = root.decrypt(encrypted)?;
            keys.push(KeyEntry {
                seq,
                cipher: Aes256GcmCipher::from_slice(&key)?,
                wrapped: Some(wrapped.clone()),
            });
            seqs.push(seq);
        }

        let counters = Counters::parse(&state.counters, &seqs, &verifier)?;

        Ok(Self {
            root,
            verifier,
            limit: KEY_USAGE_LIMIT,
            inner: Mutex::new(Inner { keys, counters }),
        })
    }

    /// Persist the sequence: wrap each key under the root cipher and sign
    /// the counters.
    ///
    /// Wrapping is cached per key, so repeated serialization of an
    /// unchanged sequence yields identical state.
    pub fn serialize(&self) -> Result<CipherState, CryptoError> {
        let mut inner = self.inner.lock().expect("cipher lock poisoned");
        let inner = &mut *inner;

        let mut keys = Vec::with_capacity(inner.keys.len());
        for entry in &mut inner.keys {
            if entry.wrapped.is_none() {
                let encrypted = self.root.encrypt(entry.cipher.key())?;
                let mut payload = Vec::with_capacity(4 + encrypted.len());
                payload.extend_from_slice(&entry.seq.to_be_bytes());
                payload.extend_from_slice(&encrypted);
                entry.wrapped = Some(B64.encode(payload));
            }
            keys.push(entry.wrapped.clone().expect("wrapped just set"));
        }

        Ok(CipherState {
            keys,
            counters: inner.counters.serialize(&self.verifier),
        })
    }

    /// Snapshot of the usage counters.
    pub fn counters(&self) -> Counters {
        self.inner
            .lock()
            .expect("cipher lock poisoned")
            .counters
            .clone()
    }

    /// Mark current counters as persisted, after a successful write.
    pub fn commit_counters(&self) {
        self.inner
            .lock()
            .expect("cipher lock poisoned")
            .counters
            .commit();
    }

    /// Fold uncommitted usage from a stale sequence into this one.
    pub fn merge_counters(&self, stale: &KeySequenceCipher) {
        let mut inner = self.inner.lock().expect("cipher lock poisoned");
        let mut other = stale.inner.lock().expect("cipher lock poisoned");
        inner.counters.merge(&mut other.counters);
    }
}

impl Cipher for KeySequenceCipher {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut inner = self.inner.lock().expect("cipher lock poisoned");
        let inner = &mut *inner;

        let exhausted = match inner.keys.last() {
            Some(entry) => inner.counters.get(entry.seq).unwrap_or(0) >= self.limit,
            None => true,
        };
        if exhausted {
            let seq = inner.keys.last().map(|entry| entry.seq + 1).unwrap_or(1);
            debug!(seq, "minting new sequence key");
            inner.counters.init(seq, 0)?;
            inner.keys.push(KeyEntry {
                seq,
                cipher: Aes256GcmCipher::generate(),
                wrapped: None,
            });
        }

        let entry = inner.keys.last().expect("at least one key");
        inner.counters.record(entry.seq)?;

        let ciphertext = entry.cipher.encrypt(data)?;
        let mut out = Vec::with_capacity(4 + ciphertext.len());
        out.extend_from_slice(&entry.seq.to_be_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < 4 {
            return Err(CryptoError::Malformed("ciphertext too short"));
        }
        let (seq_bytes, ciphertext) = data.split_at(4);
        let seq = u32::from_be_bytes(seq_bytes.try_into().expect("split at 4"));

        let inner = self.inner.lock().expect("cipher lock poisoned");
        let entry = inner
            .keys
            .iter()
            .find(|entry| entry.seq == seq)
            .ok_or(CryptoError::MissingKey(seq))?;
        entry.cipher.decrypt(ciphertext)
    }
}
