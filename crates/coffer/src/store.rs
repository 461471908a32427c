//! The public store handle.

use std::sync::Arc;

use coffer_crypto::{Cipher, Verifier};
use coffer_store::Adapter;
use serde_json::Value;

use crate::config::{Config, StoreOptions};
use crate::error::CofferError;
use crate::router::Router;
use crate::task::Task;

/// An encrypted document store over a storage adapter.
///
/// A `Store` is cheap to share; every operation runs as its own [`Task`]
/// with a fresh cache, so concurrent callers only contend at the
/// adapter's compare-and-swap.
pub struct Store {
    adapter: Arc<dyn Adapter>,
    cipher: Arc<dyn Cipher>,
    verifier: Arc<Verifier>,
    router: Arc<Router>,
}

impl Store {
    /// Initialise a new store behind the adapter.
    pub async fn create(
        adapter: Arc<dyn Adapter>,
        options: StoreOptions,
    ) -> Result<Store, CofferError> {
        let config = Config::create(&adapter, &options).await?;
        Store::unlock(adapter, &config)
    }

    /// Open an existing store behind the adapter.
    pub async fn open(
        adapter: Arc<dyn Adapter>,
        options: StoreOptions,
    ) -> Result<Store, CofferError> {
        let config = Config::open(&adapter, &options).await?;
        Store::unlock(adapter, &config)
    }

    fn unlock(adapter: Arc<dyn Adapter>, config: &Config) -> Result<Store, CofferError> {
        Ok(Store {
            adapter,
            cipher: config.build_cipher()?,
            verifier: config.build_verifier()?,
            router: config.build_router()?,
        })
    }

    /// Start a task for a multi-operation request.
    pub fn task(&self) -> Task {
        Task::new(
            self.adapter.clone(),
            self.cipher.clone(),
            self.verifier.clone(),
            self.router.clone(),
        )
    }

    /// Read a document.
    pub async fn get(&self, path: &str) -> Result<Option<Value>, CofferError> {
        self.task().get(path).await
    }

    /// List a directory's entries.
    pub async fn list(&self, path: &str) -> Result<Option<Vec<String>>, CofferError> {
        self.task().list(path).await
    }

    /// All document paths under a directory.
    pub async fn find(&self, path: &str) -> Result<Vec<String>, CofferError> {
        self.task().find(path).await
    }

    /// Create or update a document.
    pub async fn update<F>(&self, path: &str, update_fn: F) -> Result<(), CofferError>
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.task().update(path, update_fn).await
    }

    /// Delete a document.
    pub async fn remove(&self, path: &str) -> Result<(), CofferError> {
        self.task().remove(path).await
    }
}
