//! Error types for storage adapter operations.

/// Errors that can occur during adapter operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The revision presented with a write no longer matches the stored
    /// revision (or the key already exists when creation was requested).
    ///
    /// This is the expected outcome of two writers racing on one shard and
    /// drives the reload-and-retry path; it is not an anomaly.
    #[error("write conflict: the stored revision has changed")]
    Conflict,

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this error is a revision conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}
