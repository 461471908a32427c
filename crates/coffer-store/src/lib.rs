//! Storage adapters for Coffer.
//!
//! An [`Adapter`] is the sole point of cross-process coordination in a
//! Coffer store: a flat keyspace of shard blobs with revision-checked
//! compare-and-swap writes. Two backends are provided ([`MemoryAdapter`],
//! [`FileAdapter`]) plus a latency-injecting test wrapper ([`SlowAdapter`]).

pub mod error;
pub mod file;
pub mod memory;
pub mod slow;
pub mod traits;

pub use error::StoreError;
pub use file::FileAdapter;
pub use memory::MemoryAdapter;
pub use slow::SlowAdapter;
pub use traits::Adapter;
