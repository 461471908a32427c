use coffer_engine::EngineError;
use coffer_store::StoreError;
use thiserror::Error;

/// Errors returned by the public store API.
#[derive(Debug, Error)]
pub enum CofferError {
    /// The given string is not a valid path for the requested operation.
    #[error("'{0}' is not a valid path")]
    InvalidPath(String),

    /// A store option failed validation.
    #[error("invalid option: {0}")]
    Config(&'static str),

    /// `Store::create` found an existing store at this location.
    #[error("store already exists; use Store::open() to access it")]
    StoreExists,

    /// `Store::open` found no store at this location.
    #[error("store does not exist; use Store::create() to initialise it")]
    StoreMissing,

    /// The password does not unlock the store's keys.
    #[error("could not unlock the store; make sure the password is correct")]
    AccessDenied,

    /// The stored config record could not be parsed.
    #[error("store config is malformed: {0}")]
    BadConfig(#[from] serde_json::Error),

    /// The storage adapter failed outside of an engine operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A scheduled operation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl CofferError {
    pub(crate) fn is_conflict(&self) -> bool {
        matches!(self, CofferError::Engine(e) if e.is_conflict())
    }
}
