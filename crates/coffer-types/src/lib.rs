//! Shared types and identifiers for Coffer.
//!
//! This crate defines the types that cross crate boundaries in the Coffer
//! workspace: the [`ShardId`] naming an independently stored unit of the
//! document tree, the opaque [`Revision`] token adapters use for
//! compare-and-swap writes, and the [`ShardRecord`] returned by adapter
//! reads.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifier of an independently stored, independently revisioned shard.
///
/// Shard ids are short stable names (`shard-00`, `shard-01`, ...) assigned
/// by the router from a keyed hash of a document path, plus the reserved
/// `config` id holding the store's bootstrap record.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(String);

impl ShardId {
    /// Create a shard id from its string name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Return the shard id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ShardId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardId({})", self.0)
    }
}

/// Opaque compare-and-swap token guarding a shard's stored value.
///
/// A `Revision` is issued by the adapter on every successful write and must
/// be presented on the next write of the same key. How the token is derived
/// (a counter, a content hash, an etag) is an adapter implementation detail;
/// callers only ever compare revisions for equality. The *absence* of a
/// revision means "the key does not exist yet".
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Revision(String);

impl Revision {
    /// Wrap an adapter-produced token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Return the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored value together with the revision it was read at.
#[derive(Clone, Debug)]
pub struct ShardRecord {
    /// The serialized shard body.
    pub value: Bytes,
    /// The revision the value was stored under.
    pub rev: Revision,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_id_display_and_eq() {
        let a = ShardId::new("shard-00");
        let b = ShardId::from("shard-00");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "shard-00");
        assert_eq!(a.as_str(), "shard-00");
    }

    #[test]
    fn test_shard_id_ordering_is_lexicographic() {
        let mut ids = vec![
            ShardId::new("shard-02"),
            ShardId::new("config"),
            ShardId::new("shard-00"),
        ];
        ids.sort();
        assert_eq!(ids[0].as_str(), "config");
        assert_eq!(ids[1].as_str(), "shard-00");
        assert_eq!(ids[2].as_str(), "shard-02");
    }

    #[test]
    fn test_revision_equality() {
        assert_eq!(Revision::new("7"), Revision::new("7"));
        assert_ne!(Revision::new("7"), Revision::new("8"));
    }
}
