use std::sync::Arc;

use coffer_shard::ShardError;
use coffer_store::StoreError;
use thiserror::Error;

/// Errors surfaced through operation completion futures.
///
/// Cloneable because one failure is reported to every operation in the
/// failed group; the underlying store and shard errors are shared behind
/// an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A compare-and-swap write lost the race. Recovered by replanning;
    /// callers outside the retry loop should never observe this.
    #[error("write conflict")]
    Conflict,

    /// The storage adapter failed.
    #[error("store error: {0}")]
    Store(#[source] Arc<StoreError>),

    /// A shard could not be parsed, decrypted or mutated.
    #[error("shard error: {0}")]
    Shard(#[source] Arc<ShardError>),

    /// The operation was cancelled because something it depended on failed.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether this error is a recoverable write conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => EngineError::Conflict,
            other => EngineError::Store(Arc::new(other)),
        }
    }
}

impl From<ShardError> for EngineError {
    fn from(e: ShardError) -> Self {
        EngineError::Shard(Arc::new(e))
    }
}
