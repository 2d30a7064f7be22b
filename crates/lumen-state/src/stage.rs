use std::fmt;
use std::sync::Arc;

use log::debug;
use lumen_crypto::Bytes32;

use crate::cache::TrieCache;
use crate::error::StateError;
use crate::kv::{KvStore, WriteBatch};
use crate::state::code_key;
use crate::trie::MerkleTrie;

/// Trie updates computed from a [`State`](crate::State), not yet persisted.
///
/// The root is computed once when the stage is built, so [`Stage::hash`]
/// never touches the store.
pub struct Stage {
    root: Bytes32,
    account_trie: MerkleTrie,
    storage_tries: Vec<MerkleTrie>,
    codes: Vec<(Bytes32, Vec<u8>)>,
    kv: Arc<dyn KvStore>,
    cache: Arc<TrieCache>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("root", &self.root)
            .field("storage_tries", &self.storage_tries.len())
            .field("codes", &self.codes.len())
            .finish()
    }
}

impl Stage {
    pub(crate) fn new(
        account_trie: MerkleTrie,
        storage_tries: Vec<MerkleTrie>,
        codes: Vec<(Bytes32, Vec<u8>)>,
        kv: Arc<dyn KvStore>,
        cache: Arc<TrieCache>,
    ) -> Self {
        let root = account_trie.hash();
        Self { root, account_trie, storage_tries, codes, kv, cache }
    }

    pub fn hash(&self) -> Bytes32 {
        self.root
    }

    /// Persists code and every touched trie in one batch, then publishes the
    /// tries to the shared cache.
    pub fn commit(&self) -> Result<Bytes32, StateError> {
        let mut batch = WriteBatch::new();
        for (hash, code) in &self.codes {
            batch.put(code_key(hash), code.clone());
        }

        let mut published = Vec::with_capacity(self.storage_tries.len() + 1);
        for trie in &self.storage_tries {
            published.push(trie.commit_into(&mut batch)?);
        }
        let (root, entries) = self.account_trie.commit_into(&mut batch)?;
        published.push((root, entries));

        let writes = batch.len();
        self.kv.write_batch(batch)?;
        for (r, e) in published {
            self.cache.add(r, e);
        }
        debug!("committed state root {} ({} writes)", root, writes);
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemKv;
    use crate::state::StateCreator;
    use crate::trie::EMPTY_ROOT;
    use lumen_crypto::Address;
    use primitive_types::U256;

    #[test]
    fn test_debug_shows_root() {
        let creator = StateCreator::new(Arc::new(MemKv::new()));
        let mut state = creator.new_state(EMPTY_ROOT).unwrap();
        state.set_balance(&Address::left_padded(b"a"), U256::from(7)).unwrap();
        let stage = state.stage().unwrap();

        let printed = format!("{:?}", stage);
        assert!(printed.starts_with("Stage"));
        assert!(printed.contains(&stage.hash().to_string()));
    }
}
