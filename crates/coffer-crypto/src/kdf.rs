//! Password key derivation (PBKDF2-HMAC-SHA256).

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::cipher::{Aes256GcmCipher, KEY_SIZE};

/// Byte length of the random salt stored alongside a password record.
pub const SALT_SIZE: usize = 16;

/// Default PBKDF2 iteration count for new stores.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Derive a 32-byte key from a password and salt.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Build a cipher keyed by a password.
pub fn password_cipher(password: &str, salt: &[u8], iterations: u32) -> Aes256GcmCipher {
    Aes256GcmCipher::new(derive_key(password, salt, iterations))
}

/// Generate a random salt for a new password record.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rng().fill_bytes(&mut salt);
    salt
}
