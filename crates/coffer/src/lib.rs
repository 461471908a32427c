//! Coffer is an encrypted, shardable document store.
//!
//! Documents are JSON values named by `/`-separated paths and spread
//! across a fixed set of encrypted shards by a keyed hash of the path.
//! Every shard is an independently revisioned blob behind a pluggable
//! storage [`Adapter`]; writers coordinate only through the adapter's
//! compare-and-swap, so any backend that can do an atomic conditional
//! write can host a store.
//!
//! ```no_run
//! use std::sync::Arc;
//! use coffer::{MemoryAdapter, Store, StoreOptions};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), coffer::CofferError> {
//! let adapter = Arc::new(MemoryAdapter::new());
//! let store = Store::create(adapter, StoreOptions::new("open sesame")).await?;
//!
//! store.update("/contacts/alice.json", |_| json!({ "email": "alice@example.com" })).await?;
//! let doc = store.get("/contacts/alice.json").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod path;
pub mod router;
pub mod store;
pub mod task;

pub use config::{Config, StoreOptions, CONFIG_SHARD_ID};
pub use error::CofferError;
pub use path::Path;
pub use router::Router;
pub use store::Store;
pub use task::Task;

pub use coffer_store::{Adapter, FileAdapter, MemoryAdapter, SlowAdapter, StoreError};
