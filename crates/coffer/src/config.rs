//! Store bootstrap: the config record and option validation.
//!
//! The config lives in the adapter under the reserved `config` key as
//! plaintext JSON. It holds the PBKDF2 parameters and the store's three
//! secrets (root cipher key, counter verifier key, router key), each
//! wrapped by a cipher derived from the password. Everything needed to
//! open the store is in this one record; losing the password loses the
//! store.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use bytes::Bytes;
use coffer_crypto::kdf::{self, DEFAULT_ITERATIONS, SALT_SIZE};
use coffer_crypto::{Aes256GcmCipher, Cipher, Verifier};
use coffer_store::{Adapter, StoreError};
use coffer_types::ShardId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CofferError;
use crate::router::Router;

/// Reserved shard id holding the config record.
pub const CONFIG_SHARD_ID: &str = "config";

/// Default sharding level for new stores (`2^level` shards).
pub const DEFAULT_LEVEL: u32 = 1;

const VERSION: u32 = 1;
const MAX_LEVEL: u32 = 32;

/// Options for creating or opening a store.
#[derive(Clone)]
pub struct StoreOptions {
    password: String,
    iterations: u32,
    level: u32,
}

impl StoreOptions {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            iterations: DEFAULT_ITERATIONS,
            level: DEFAULT_LEVEL,
        }
    }

    /// Override the PBKDF2 iteration count (create only).
    pub fn iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Override the sharding level (create only).
    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    fn validate(&self) -> Result<(), CofferError> {
        if self.password.is_empty() {
            return Err(CofferError::Config("password must be a non-empty string"));
        }
        if self.iterations == 0 {
            return Err(CofferError::Config("iterations must be a positive integer"));
        }
        if self.level == 0 || self.level > MAX_LEVEL {
            return Err(CofferError::Config("level must be between 1 and 32"));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct ConfigRecord {
    version: u32,
    password: PasswordRecord,
    cipher: KeyRecord,
    verifier: KeyRecord,
    shards: ShardsRecord,
}

#[derive(Serialize, Deserialize)]
struct PasswordRecord {
    salt: String,
    iterations: u32,
}

#[derive(Serialize, Deserialize)]
struct KeyRecord {
    key: String,
}

#[derive(Serialize, Deserialize)]
struct ShardsRecord {
    key: String,
    level: u32,
}

/// A loaded config record with the password-derived unwrapping cipher.
pub struct Config {
    record: ConfigRecord,
    password_cipher: Aes256GcmCipher,
}

impl Config {
    /// Initialise a new store, failing if one already exists.
    pub async fn create(
        adapter: &Arc<dyn Adapter>,
        options: &StoreOptions,
    ) -> Result<Config, CofferError> {
        options.validate()?;

        let salt = kdf::generate_salt();
        let password_cipher = kdf::password_cipher(&options.password, &salt, options.iterations);

        let record = ConfigRecord {
            version: VERSION,
            password: PasswordRecord {
                salt: B64.encode(salt),
                iterations: options.iterations,
            },
            cipher: wrap_key(&password_cipher, Aes256GcmCipher::generate().key())?,
            verifier: wrap_key(&password_cipher, Verifier::generate().key())?,
            shards: ShardsRecord {
                key: wrap_key(&password_cipher, &Router::generate_key())?.key,
                level: options.level,
            },
        };

        let json = serde_json::to_vec_pretty(&record)?;
        let id = ShardId::new(CONFIG_SHARD_ID);

        match adapter.write(&id, Bytes::from(json), None).await {
            Ok(_) => {
                info!(level = record.shards.level, "created store");
                Ok(Config {
                    record,
                    password_cipher,
                })
            }
            Err(StoreError::Conflict) => Err(CofferError::StoreExists),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the config of an existing store.
    pub async fn open(
        adapter: &Arc<dyn Adapter>,
        options: &StoreOptions,
    ) -> Result<Config, CofferError> {
        options.validate()?;

        let id = ShardId::new(CONFIG_SHARD_ID);
        let stored = adapter.read(&id).await?.ok_or(CofferError::StoreMissing)?;
        let record: ConfigRecord = serde_json::from_slice(&stored.value)?;

        let salt = B64
            .decode(&record.password.salt)
            .map_err(|_| CofferError::AccessDenied)?;
        if salt.len() != SALT_SIZE {
            return Err(CofferError::AccessDenied);
        }
        let password_cipher =
            kdf::password_cipher(&options.password, &salt, record.password.iterations);

        Ok(Config {
            record,
            password_cipher,
        })
    }

    /// Unwrap the root cipher that encrypts shard keys.
    pub fn build_cipher(&self) -> Result<Arc<dyn Cipher>, CofferError> {
        let key = self.unwrap_key(&self.record.cipher.key)?;
        let cipher = Aes256GcmCipher::from_slice(&key).map_err(|_| CofferError::AccessDenied)?;
        Ok(Arc::new(cipher))
    }

    /// Unwrap the verifier that signs shard counter state.
    pub fn build_verifier(&self) -> Result<Arc<Verifier>, CofferError> {
        let key = self.unwrap_key(&self.record.verifier.key)?;
        let verifier = Verifier::from_slice(&key).map_err(|_| CofferError::AccessDenied)?;
        Ok(Arc::new(verifier))
    }

    /// Unwrap the router that maps paths to shards.
    pub fn build_router(&self) -> Result<Arc<Router>, CofferError> {
        let key = self.unwrap_key(&self.record.shards.key)?;
        Ok(Arc::new(Router::new(key, self.record.shards.level)))
    }

    fn unwrap_key(&self, wrapped: &str) -> Result<Vec<u8>, CofferError> {
        let data = B64.decode(wrapped).map_err(|_| CofferError::AccessDenied)?;
        self.password_cipher
            .decrypt(&data)
            .map_err(|_| CofferError::AccessDenied)
    }
}

fn wrap_key(cipher: &Aes256GcmCipher, key: &[u8]) -> Result<KeyRecord, CofferError> {
    let wrapped = cipher
        .encrypt(key)
        .map_err(|_| CofferError::Config("could not wrap a store key"))?;
    Ok(KeyRecord {
        key: B64.encode(wrapped),
    })
}
