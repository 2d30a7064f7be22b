use std::num::NonZeroUsize;
use std::sync::Arc;

use log::trace;
use lru::LruCache;
use lumen_crypto::Bytes32;
use parking_lot::Mutex;

use crate::trie::Entries;

pub const DEFAULT_TRIE_CACHE_SIZE: usize = 256;

/// **Shared LRU of committed tries, keyed by root**
///
/// Shared by every `State` opened over the same store. Entries are handed
/// out as shared snapshots; writers copy on first write. A later commit for
/// the same root replaces the earlier entry.
pub struct TrieCache {
    inner: Mutex<LruCache<Bytes32, Arc<Entries>>>,
}

impl TrieCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner: Mutex::new(LruCache::new(cap)) }
    }

    pub(crate) fn get(&self, root: &Bytes32) -> Option<Arc<Entries>> {
        self.inner.lock().get(root).cloned()
    }

    pub(crate) fn add(&self, root: Bytes32, entries: Arc<Entries>) {
        trace!("trie cache add {}", root);
        self.inner.lock().put(root, entries);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for TrieCache {
    fn default() -> Self {
        Self::new(DEFAULT_TRIE_CACHE_SIZE)
    }
}
