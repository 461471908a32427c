//! Keyed signatures over small payloads.
//!
//! Shards carry usage counters that an attacker with storage access could
//! otherwise roll back. The [`Verifier`] signs those payloads with
//! HMAC-SHA256 so a rollback is detected when the shard is parsed.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Byte length of a verifier key.
pub const VERIFIER_KEY_SIZE: usize = 32;

/// Signs and verifies payloads with HMAC-SHA256.
///
/// The signed form is `base64(data).base64(mac)`.
pub struct Verifier {
    key: [u8; VERIFIER_KEY_SIZE],
}

impl Verifier {
    /// Build a verifier from raw key bytes.
    pub fn new(key: [u8; VERIFIER_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Build a verifier from a key slice, checking its length.
    pub fn from_slice(key: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; VERIFIER_KEY_SIZE] = key
            .try_into()
            .map_err(|_| CryptoError::Malformed("bad verifier key length"))?;
        Ok(Self { key })
    }

    /// Generate a verifier with a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; VERIFIER_KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Raw key bytes, for wrapping under a cipher.
    pub fn key(&self) -> &[u8; VERIFIER_KEY_SIZE] {
        &self.key
    }

    /// Sign a payload, producing the `data.mac` form.
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(data);
        let tag = mac.finalize().into_bytes();
        format!("{}.{}", B64.encode(data), B64.encode(tag))
    }

    /// Verify a signed payload and return the data it carries.
    pub fn parse(&self, signed: &str) -> Result<Vec<u8>, CryptoError> {
        let (data_b64, tag_b64) = signed
            .split_once('.')
            .ok_or(CryptoError::MalformedSignature)?;
        let data = B64
            .decode(data_b64)
            .map_err(|_| CryptoError::MalformedSignature)?;
        let tag = B64
            .decode(tag_b64)
            .map_err(|_| CryptoError::MalformedSignature)?;

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(&data);
        mac.verify_slice(&tag)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        Ok(data)
    }
}
