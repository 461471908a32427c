use thiserror::Error;

/// Errors from ciphers, signatures and usage accounting.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A signature did not verify against its payload.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A signed payload was not in the `data.mac` form.
    #[error("malformed signature")]
    MalformedSignature,

    /// Ciphertext references a key sequence number we do not hold.
    #[error("missing key: {0}")]
    MissingKey(u32),

    /// Serialized counter state does not match the number of keys.
    #[error("counter state has wrong size")]
    CounterStateSize,

    /// A counter was initialized twice for the same key.
    #[error("counter already exists: {0}")]
    CounterExists(u32),

    /// A counter operation referenced an unknown key.
    #[error("unknown counter: {0}")]
    UnknownCounter(u32),

    /// AEAD encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// AEAD decryption failed (wrong key or tampered ciphertext).
    #[error("decryption failed")]
    Decrypt,

    /// Input bytes were not valid for the expected format.
    #[error("malformed data: {0}")]
    Malformed(&'static str),
}
