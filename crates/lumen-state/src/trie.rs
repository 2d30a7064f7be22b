//! Sorted key/value map with a binary Merkle root.
//!
//! Leaves are `blake2b(0x00 ‖ len(key) ‖ key ‖ value)` in key order; inner
//! nodes are `blake2b(0x01 ‖ left ‖ right)` and an odd node is carried up
//! unchanged. A committed trie is persisted as one encoded node under its
//! root, so tries that share contents share storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use lumen_crypto::{blake2b256_concat, Bytes32};

use crate::cache::TrieCache;
use crate::error::StateError;
use crate::kv::{KvStore, WriteBatch};

/// Root of a trie with no entries.
pub const EMPTY_ROOT: Bytes32 = Bytes32::ZERO;

const NODE_PREFIX: &[u8] = b"trie:";

pub(crate) type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

pub(crate) fn node_key(root: &Bytes32) -> Vec<u8> {
    let mut key = NODE_PREFIX.to_vec();
    key.extend_from_slice(root.as_bytes());
    key
}

fn leaf_hash(key: &[u8], value: &[u8]) -> Bytes32 {
    let len = (key.len() as u32).to_be_bytes();
    blake2b256_concat(&[&[0x00], &len, key, value])
}

/// Merkle root over `pairs`. Duplicate keys keep the last value; empty values
/// are treated as absent.
pub fn merkle_root_of<K, V, I>(pairs: I) -> Bytes32
where
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
    I: IntoIterator<Item = (K, V)>,
{
    let mut sorted: Entries = BTreeMap::new();
    for (k, v) in pairs {
        if v.as_ref().is_empty() {
            sorted.remove(k.as_ref());
        } else {
            sorted.insert(k.as_ref().to_vec(), v.as_ref().to_vec());
        }
    }
    root_of_sorted(&sorted)
}

fn root_of_sorted(entries: &Entries) -> Bytes32 {
    let mut level: Vec<Bytes32> = entries.iter().map(|(k, v)| leaf_hash(k, v)).collect();
    if level.is_empty() {
        return EMPTY_ROOT;
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => blake2b256_concat(&[&[0x01], left.as_bytes(), right.as_bytes()]),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level[0]
}

/// A trie snapshot. Cloning is cheap; the first write after a clone copies
/// the entries so tries handed out by the cache are never aliased.
#[derive(Clone, Debug, Default)]
pub struct MerkleTrie {
    entries: Arc<Entries>,
}

impl MerkleTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_shared(entries: Arc<Entries>) -> Self {
        Self { entries }
    }

    /// Opens the trie at `root`, preferring the shared cache over the store.
    pub fn open(root: Bytes32, kv: &dyn KvStore, cache: &TrieCache) -> Result<Self, StateError> {
        if root == EMPTY_ROOT {
            return Ok(Self::new());
        }
        if let Some(entries) = cache.get(&root) {
            return Ok(Self::from_shared(entries));
        }
        let raw = kv.get(&node_key(&root))?.ok_or(StateError::MissingTrieNode(root))?;
        let entries: Arc<Entries> = Arc::new(bincode::deserialize(&raw)?);
        cache.add(root, entries.clone());
        Ok(Self::from_shared(entries))
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Sets `key` to `value`; an empty value removes the key.
    pub fn update(&mut self, key: &[u8], value: Vec<u8>) {
        let entries = Arc::make_mut(&mut self.entries);
        if value.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(key.to_vec(), value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn hash(&self) -> Bytes32 {
        root_of_sorted(&self.entries)
    }

    /// Queues the encoded trie into `batch` and returns its root together with
    /// the shared entries for publishing in the cache.
    pub(crate) fn commit_into(
        &self,
        batch: &mut WriteBatch,
    ) -> Result<(Bytes32, Arc<Entries>), StateError> {
        let root = self.hash();
        if root != EMPTY_ROOT {
            batch.put(node_key(&root), bincode::serialize(self.entries.as_ref())?);
        }
        Ok((root, self.entries.clone()))
    }
}
