//! The [`Cipher`] trait and the AES-256-GCM implementation behind it.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::CryptoError;

/// Byte length of an AES-256 key.
pub const KEY_SIZE: usize = 32;

/// Byte length of the GCM nonce prepended to every ciphertext.
pub const NONCE_SIZE: usize = 12;

/// Symmetric authenticated encryption.
///
/// Implementations own their key material; callers only see opaque
/// ciphertext. Decryption fails on any tampering.
pub trait Cipher: Send + Sync {
    /// Encrypt `data`, returning nonce-prefixed ciphertext.
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt nonce-prefixed ciphertext produced by [`Cipher::encrypt`].
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// AES-256-GCM with a random nonce per encryption.
///
/// Output layout is `nonce || ciphertext || tag`, so each ciphertext is
/// self-contained and no nonce bookkeeping is needed by callers.
pub struct Aes256GcmCipher {
    key: [u8; KEY_SIZE],
}

impl Aes256GcmCipher {
    /// Build a cipher from raw key bytes.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Build a cipher from a key slice, checking its length.
    pub fn from_slice(key: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = key
            .try_into()
            .map_err(|_| CryptoError::Malformed("bad key length"))?;
        Ok(Self { key })
    }

    /// Generate a cipher with a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Raw key bytes, for wrapping under another cipher.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Cipher for Aes256GcmCipher {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), data)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::Malformed("ciphertext too short"));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}
