//! The shard document format.
//!
//! A shard serializes to newline-separated text: a plaintext JSON header
//! carrying the wrapped key sequence and signed usage counters, then one
//! encrypted cell per line. The first cell is the index, a sorted list of
//! every path stored in the shard; the remaining cells hold the values, in
//! index order. Directory entries are sorted name lists, documents are
//! arbitrary JSON.

use std::sync::{Arc, RwLock};

use coffer_crypto::{Cipher, CipherState, Counters, KeySequenceCipher, Verifier};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::trace;

use crate::cell::Cell;
use crate::error::ShardError;

const SHARD_VERSION: u32 = 1;
const TAG_SIZE: usize = 8;

#[derive(Serialize, Deserialize)]
struct Header {
    version: u32,
    tag: String,
    cipher: CipherState,
}

struct Inner {
    index: Cell,
    items: Vec<Cell>,
}

/// One encrypted shard: a sorted path index plus a cell per path.
pub struct Shard {
    cipher: KeySequenceCipher,
    inner: RwLock<Inner>,
}

impl Shard {
    /// Create an empty shard with a fresh key sequence.
    pub fn new(root: Arc<dyn Cipher>, verifier: Arc<Verifier>) -> Self {
        Self {
            cipher: KeySequenceCipher::new(root, verifier),
            inner: RwLock::new(Inner {
                index: Cell::with_value(json!([])),
                items: Vec::new(),
            }),
        }
    }

    /// Parse shard text produced by [`Shard::serialize`].
    pub fn parse(
        text: &str,
        root: Arc<dyn Cipher>,
        verifier: Arc<Verifier>,
    ) -> Result<Self, ShardError> {
        let mut lines = text.split('\n');

        let header = lines.next().ok_or(ShardError::Malformed("empty shard"))?;
        let header: Header = serde_json::from_str(header)?;
        if header.version != SHARD_VERSION {
            return Err(ShardError::Malformed("unsupported shard version"));
        }

        let cipher = KeySequenceCipher::parse(&header.cipher, root, verifier)?;

        let index = lines
            .next()
            .ok_or(ShardError::Malformed("missing index cell"))?;
        let index = Cell::from_encrypted(index.to_owned());
        let items: Vec<Cell> = lines.map(|line| Cell::from_encrypted(line.to_owned())).collect();
        trace!(items = items.len(), "parsed shard");

        Ok(Self {
            cipher,
            inner: RwLock::new(Inner { index, items }),
        })
    }

    /// Serialize to shard text, re-encrypting only modified cells.
    ///
    /// The header carries a random tag so that two serializations of the
    /// same content still produce distinct bytes.
    pub fn serialize(&self) -> Result<String, ShardError> {
        let inner = self.inner.read().expect("shard lock poisoned");

        let mut lines = Vec::with_capacity(inner.items.len() + 2);
        lines.push(String::new()); // header placeholder
        lines.push(inner.index.serialize(&self.cipher)?);
        for item in &inner.items {
            lines.push(item.serialize(&self.cipher)?);
        }

        let mut tag = [0u8; TAG_SIZE];
        rand::rng().fill_bytes(&mut tag);

        let header = Header {
            version: SHARD_VERSION,
            tag: {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(tag)
            },
            cipher: self.cipher.serialize()?,
        };
        lines[0] = serde_json::to_string(&header)?;

        Ok(lines.join("\n"))
    }

    /// Number of paths stored in the shard.
    pub fn len(&self) -> Result<usize, ShardError> {
        let inner = self.inner.read().expect("shard lock poisoned");
        Ok(load_index(&self.cipher, &inner.index)?.len())
    }

    /// Whether the shard stores no paths.
    pub fn is_empty(&self) -> Result<bool, ShardError> {
        Ok(self.len()? == 0)
    }

    /// Value stored at a path, if any.
    pub fn get(&self, path: &str) -> Result<Option<Value>, ShardError> {
        let inner = self.inner.read().expect("shard lock poisoned");
        let index = load_index(&self.cipher, &inner.index)?;

        match index.binary_search_by(|p| p.as_str().cmp(path)) {
            Ok(i) => Ok(Some(inner.items[i].get(&self.cipher)?)),
            Err(_) => Ok(None),
        }
    }

    /// Names linked under a directory path, if the directory exists.
    pub fn list(&self, path: &str) -> Result<Option<Vec<String>>, ShardError> {
        match self.get(path)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Add a name to a directory, creating the directory if needed.
    ///
    /// Directory entries stay sorted and deduplicated.
    pub fn link(&self, path: &str, name: &str) -> Result<(), ShardError> {
        let mut guard = self.inner.write().expect("shard lock poisoned");
        let inner = &mut *guard;

        let i = get_or_insert(&self.cipher, inner, path, json!([]))?;
        let mut names: Vec<String> = serde_json::from_value(inner.items[i].get(&self.cipher)?)?;

        if let Err(pos) = names.binary_search_by(|n| n.as_str().cmp(name)) {
            names.insert(pos, name.to_owned());
            inner.items[i].set(Value::from(names));
        }
        Ok(())
    }

    /// Remove a name from a directory, dropping the directory once empty.
    ///
    /// Missing directories and missing names are not errors.
    pub fn unlink(&self, path: &str, name: &str) -> Result<(), ShardError> {
        let mut guard = self.inner.write().expect("shard lock poisoned");
        let inner = &mut *guard;

        let index = load_index(&self.cipher, &inner.index)?;
        let Ok(i) = index.binary_search_by(|p| p.as_str().cmp(path)) else {
            return Ok(());
        };

        let mut names: Vec<String> = serde_json::from_value(inner.items[i].get(&self.cipher)?)?;
        if let Ok(pos) = names.binary_search_by(|n| n.as_str().cmp(name)) {
            names.remove(pos);
            if names.is_empty() {
                remove_at(&self.cipher, inner, i)?;
            } else {
                inner.items[i].set(Value::from(names));
            }
        }
        Ok(())
    }

    /// Update the document at a path, creating it if needed.
    ///
    /// The function receives the current value, or `Null` for a new
    /// document, and returns the value to store.
    pub fn put(&self, path: &str, f: impl FnOnce(Value) -> Value) -> Result<(), ShardError> {
        let mut guard = self.inner.write().expect("shard lock poisoned");
        let inner = &mut *guard;

        let i = get_or_insert(&self.cipher, inner, path, Value::Null)?;
        inner.items[i].update(&self.cipher, f)
    }

    /// Remove the document at a path. Missing paths are not errors.
    pub fn remove(&self, path: &str) -> Result<(), ShardError> {
        let mut guard = self.inner.write().expect("shard lock poisoned");
        let inner = &mut *guard;

        let index = load_index(&self.cipher, &inner.index)?;
        if let Ok(i) = index.binary_search_by(|p| p.as_str().cmp(path)) {
            remove_at(&self.cipher, inner, i)?;
        }
        Ok(())
    }

    /// Snapshot of the key usage counters.
    pub fn counters(&self) -> Counters {
        self.cipher.counters()
    }

    /// Mark current key usage as persisted, after a successful write.
    pub fn commit_counters(&self) {
        self.cipher.commit_counters();
    }

    /// Fold uncommitted key usage from a stale copy of this shard.
    pub fn merge_counters(&self, stale: &Shard) {
        self.cipher.merge_counters(&stale.cipher);
    }
}

fn load_index(cipher: &dyn Cipher, index: &Cell) -> Result<Vec<String>, ShardError> {
    Ok(serde_json::from_value(index.get(cipher)?)?)
}

fn get_or_insert(
    cipher: &KeySequenceCipher,
    inner: &mut Inner,
    path: &str,
    init: Value,
) -> Result<usize, ShardError> {
    let mut index = load_index(cipher, &inner.index)?;

    match index.binary_search_by(|p| p.as_str().cmp(path)) {
        Ok(i) => Ok(i),
        Err(i) => {
            index.insert(i, path.to_owned());
            inner.index.set(Value::from(index));
            inner.items.insert(i, Cell::with_value(init));
            Ok(i)
        }
    }
}

fn remove_at(
    cipher: &KeySequenceCipher,
    inner: &mut Inner,
    i: usize,
) -> Result<(), ShardError> {
    let mut index = load_index(cipher, &inner.index)?;
    index.remove(i);
    inner.index.set(Value::from(index));
    inner.items.remove(i);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_crypto::Aes256GcmCipher;

    fn make_keys() -> (Arc<dyn Cipher>, Arc<Verifier>) {
        let root: Arc<dyn Cipher> = Arc::new(Aes256GcmCipher::generate());
        (root, Arc::new(Verifier::generate()))
    }

    #[test]
    fn test_empty_shard() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root, verifier);

        assert_eq!(shard.len().unwrap(), 0);
        assert_eq!(shard.get("/doc").unwrap(), None);
        assert_eq!(shard.list("/").unwrap(), None);
    }

    #[test]
    fn test_put_then_get() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root, verifier);

        shard.put("/doc", |_| json!({ "n": 1 })).unwrap();
        assert_eq!(shard.get("/doc").unwrap(), Some(json!({ "n": 1 })));
        assert_eq!(shard.len().unwrap(), 1);
    }

    #[test]
    fn test_put_passes_current_value() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root, verifier);

        shard.put("/doc", |old| {
            assert_eq!(old, Value::Null);
            json!(1)
        })
        .unwrap();
        shard.put("/doc", |old| {
            assert_eq!(old, json!(1));
            json!(2)
        })
        .unwrap();
        assert_eq!(shard.get("/doc").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_link_keeps_names_sorted_and_unique() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root, verifier);

        shard.link("/", "b").unwrap();
        shard.link("/", "a").unwrap();
        shard.link("/", "b").unwrap();

        assert_eq!(
            shard.list("/").unwrap(),
            Some(vec!["a".to_owned(), "b".to_owned()])
        );
    }

    #[test]
    fn test_unlink_drops_empty_directory() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root, verifier);

        shard.link("/", "a").unwrap();
        shard.link("/", "b").unwrap();

        shard.unlink("/", "a").unwrap();
        assert_eq!(shard.list("/").unwrap(), Some(vec!["b".to_owned()]));

        shard.unlink("/", "b").unwrap();
        assert_eq!(shard.list("/").unwrap(), None);
        assert_eq!(shard.len().unwrap(), 0);
    }

    #[test]
    fn test_unlink_missing_is_noop() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root, verifier);

        shard.unlink("/", "a").unwrap();
        shard.link("/", "a").unwrap();
        shard.unlink("/", "z").unwrap();
        assert_eq!(shard.list("/").unwrap(), Some(vec!["a".to_owned()]));
    }

    #[test]
    fn test_remove_document() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root, verifier);

        shard.put("/a", |_| json!(1)).unwrap();
        shard.put("/b", |_| json!(2)).unwrap();

        shard.remove("/a").unwrap();
        assert_eq!(shard.get("/a").unwrap(), None);
        assert_eq!(shard.get("/b").unwrap(), Some(json!(2)));
        shard.remove("/missing").unwrap();
    }

    #[test]
    fn test_serialize_parse_round_trip() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root.clone(), verifier.clone());

        shard.put("/doc", |_| json!({ "n": 1 })).unwrap();
        shard.link("/", "doc").unwrap();

        let text = shard.serialize().unwrap();
        let restored = Shard::parse(&text, root, verifier).unwrap();

        assert_eq!(restored.get("/doc").unwrap(), Some(json!({ "n": 1 })));
        assert_eq!(restored.list("/").unwrap(), Some(vec!["doc".to_owned()]));
        assert_eq!(restored.len().unwrap(), 2);
    }

    #[test]
    fn test_unmodified_cells_keep_ciphertext() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root.clone(), verifier.clone());

        shard.put("/a", |_| json!(1)).unwrap();
        shard.put("/b", |_| json!(2)).unwrap();
        let first = shard.serialize().unwrap();

        shard.put("/b", |_| json!(3)).unwrap();
        let second = shard.serialize().unwrap();

        // Cell for /a is untouched; only the header, index and /b change.
        let first_lines: Vec<_> = first.split('\n').collect();
        let second_lines: Vec<_> = second.split('\n').collect();
        assert_eq!(first_lines[2], second_lines[2]);
        assert_ne!(first_lines[3], second_lines[3]);
    }

    #[test]
    fn test_parse_with_wrong_root_fails() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root, verifier.clone());
        shard.put("/doc", |_| json!(1)).unwrap();
        let text = shard.serialize().unwrap();

        let other: Arc<dyn Cipher> = Arc::new(Aes256GcmCipher::generate());
        assert!(Shard::parse(&text, other, verifier).is_err());
    }

    #[test]
    fn test_parse_with_wrong_verifier_fails() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root.clone(), verifier);
        shard.put("/doc", |_| json!(1)).unwrap();
        let text = shard.serialize().unwrap();

        assert!(Shard::parse(&text, root, Arc::new(Verifier::generate())).is_err());
    }

    #[test]
    fn test_counter_merge_across_copies() {
        let (root, verifier) = make_keys();
        let shard = Shard::new(root.clone(), verifier.clone());
        shard.put("/doc", |_| json!(1)).unwrap();
        let text = shard.serialize().unwrap();

        // A stale copy encrypts more cells; its usage folds into a fresh
        // parse without double counting.
        let stale = Shard::parse(&text, root.clone(), verifier.clone()).unwrap();
        stale.put("/other", |_| json!(2)).unwrap();
        stale.serialize().unwrap();

        let fresh = Shard::parse(&text, root, verifier).unwrap();
        let before = fresh.counters().get(1).unwrap();
        fresh.merge_counters(&stale);
        fresh.merge_counters(&stale);
        let after = fresh.counters().get(1).unwrap();
        assert!(after > before);

        let stale_total = stale.counters().get(1).unwrap();
        assert_eq!(after, stale_total);
    }
}
