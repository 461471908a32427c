//! Lazily decrypted value cells.
//!
//! A shard is a list of cells, each holding one JSON value encrypted as a
//! single base64 token. Cells decrypt on first access and re-encrypt only
//! if modified, so serializing a shard where most cells were untouched
//! reuses their existing ciphertext.

use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use coffer_crypto::Cipher;
use serde_json::Value;

use crate::error::ShardError;

pub(crate) struct Cell {
    state: Mutex<CellState>,
}

struct CellState {
    encrypted: Option<String>,
    plain: Option<Value>,
    modified: bool,
}

impl Cell {
    /// Wrap an encrypted token loaded from shard text.
    pub fn from_encrypted(data: String) -> Self {
        Self {
            state: Mutex::new(CellState {
                encrypted: Some(data),
                plain: None,
                modified: false,
            }),
        }
    }

    /// Create a cell holding a fresh plaintext value.
    pub fn with_value(value: Value) -> Self {
        Self {
            state: Mutex::new(CellState {
                encrypted: None,
                plain: Some(value),
                modified: true,
            }),
        }
    }

    /// Decrypt if needed and return a copy of the value.
    pub fn get(&self, cipher: &dyn Cipher) -> Result<Value, ShardError> {
        let mut state = self.state.lock().expect("cell lock poisoned");

        if state.plain.is_none() {
            let plain = match &state.encrypted {
                Some(token) => {
                    let ciphertext = B64
                        .decode(token)
                        .map_err(|_| ShardError::Malformed("bad cell encoding"))?;
                    let data = cipher.decrypt(&ciphertext)?;
                    serde_json::from_slice(&data)?
                }
                None => Value::Null,
            };
            state.plain = Some(plain);
        }

        Ok(state.plain.clone().expect("plain just set"))
    }

    /// Replace the value, marking the cell for re-encryption.
    pub fn set(&self, value: Value) {
        let mut state = self.state.lock().expect("cell lock poisoned");
        state.plain = Some(value);
        state.modified = true;
    }

    /// Apply a function to the value in place.
    pub fn update(
        &self,
        cipher: &dyn Cipher,
        f: impl FnOnce(Value) -> Value,
    ) -> Result<(), ShardError> {
        let value = self.get(cipher)?;
        self.set(f(value));
        Ok(())
    }

    /// Return the encrypted token, re-encrypting first if modified.
    pub fn serialize(&self, cipher: &dyn Cipher) -> Result<String, ShardError> {
        let mut state = self.state.lock().expect("cell lock poisoned");

        if state.modified {
            let plain = state.plain.as_ref().unwrap_or(&Value::Null);
            let data = serde_json::to_vec(plain)?;
            state.encrypted = Some(B64.encode(cipher.encrypt(&data)?));
            state.modified = false;
        }

        state
            .encrypted
            .clone()
            .ok_or(ShardError::Malformed("cell has no content"))
    }
}
