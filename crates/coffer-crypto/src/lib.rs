//! Cryptography for Coffer shards.
//!
//! All shard content is encrypted client-side before it reaches a storage
//! adapter. This crate provides the [`Cipher`] trait, the AES-256-GCM
//! implementation, password key derivation, HMAC signing for anti-rollback
//! counters, and the rotating [`KeySequenceCipher`] each shard encrypts
//! its cells with.

pub mod cipher;
pub mod counters;
pub mod error;
pub mod kdf;
pub mod key_sequence;
pub mod verifier;

pub use cipher::{Aes256GcmCipher, Cipher, KEY_SIZE};
pub use counters::Counters;
pub use error::CryptoError;
pub use key_sequence::{CipherState, KeySequenceCipher, KEY_USAGE_LIMIT};
pub use verifier::Verifier;
