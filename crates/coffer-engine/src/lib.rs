//! Write scheduling and optimistic concurrency for Coffer.
//!
//! The engine sits between the planner and the storage adapter. Callers
//! submit operations (mutations of a shard, ordered by explicit
//! dependencies) to the [`Executor`]; the [`schedule`] groups them so
//! each shard is written as few times as possible while respecting the
//! dependency order, and the [`cache`] turns each group into one
//! compare-and-swap round trip against the store.

pub mod cache;
pub mod error;
pub mod executor;
pub mod schedule;

pub use cache::ShardCache;
pub use error::EngineError;
pub use executor::{Executor, Mutation, OpHandle};
pub use schedule::{GroupId, OpId, Schedule};
