//! Encrypted shard documents.
//!
//! A shard is the unit of storage and of write atomicity in a Coffer
//! store: a sorted path index plus one encrypted cell per path, serialized
//! as newline-separated text. See [`Shard`] for the format.

mod cell;
pub mod error;
pub mod shard;

pub use error::ShardError;
pub use shard::Shard;
