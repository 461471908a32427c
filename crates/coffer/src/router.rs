//! Keyed path-to-shard routing.
//!
//! Paths are assigned to shards by an HMAC of the full path string, so an
//! observer of the storage backend cannot tell which paths live in which
//! shard without the router key. The shard count is a power of two; the
//! `level` is the exponent, and a shard id is the first 32 bits of the
//! HMAC reduced modulo the shard count, printed as zero-padded hex.

use coffer_types::ShardId;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Byte length of a router key.
pub const ROUTER_KEY_SIZE: usize = 32;

/// Maps document paths onto a fixed set of shards.
pub struct Router {
    key: Vec<u8>,
    level: u32,
}

impl Router {
    pub fn new(key: Vec<u8>, level: u32) -> Self {
        Self { key, level }
    }

    /// Generate a fresh random router key.
    pub fn generate_key() -> Vec<u8> {
        let mut key = vec![0u8; ROUTER_KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// The shard holding the given path.
    pub fn route(&self, path: &str) -> ShardId {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(path.as_bytes());
        let hash = mac.finalize().into_bytes();

        let word = u32::from_be_bytes(hash[..4].try_into().expect("digest has 32 bytes"));
        let shards = 1u64 << self.level;
        let digits = self.level.div_ceil(4) as usize;

        ShardId::new(format!(
            "shard-{:0digits$x}",
            u64::from(word) % shards,
            digits = digits
        ))
    }
}
