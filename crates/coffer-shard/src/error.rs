use coffer_crypto::CryptoError;
use thiserror::Error;

/// Errors from parsing, reading or mutating a shard.
#[derive(Debug, Error)]
pub enum ShardError {
    /// A cipher or signature operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The shard text does not match the expected layout.
    #[error("malformed shard: {0}")]
    Malformed(&'static str),

    /// A cell's plaintext was not valid JSON of the expected shape.
    #[error("invalid shard data: {0}")]
    Json(#[from] serde_json::Error),
}
