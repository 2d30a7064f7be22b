use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use lumen_crypto::{keccak256, Address, Bytes32};
use primitive_types::U256;

use crate::account::Account;
use crate::cache::TrieCache;
use crate::error::StateError;
use crate::journal::Journal;
use crate::kv::KvStore;
use crate::stage::Stage;
use crate::trie::MerkleTrie;

const CODE_PREFIX: &[u8] = b"code:";

pub(crate) fn code_key(hash: &Bytes32) -> Vec<u8> {
    let mut key = CODE_PREFIX.to_vec();
    key.extend_from_slice(hash.as_bytes());
    key
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StateKey {
    Account(Address),
    Storage(Address, Bytes32),
    Code(Address),
}

#[derive(Debug, Clone)]
enum StateValue {
    Account(Account),
    Storage(Vec<u8>),
    Code(Vec<u8>),
}

/// Base view of one account as found in the tries, loaded lazily.
struct CachedObject {
    account: Account,
    storage: Option<MerkleTrie>,
    code: Option<Vec<u8>>,
}

#[derive(Default)]
struct AccountChange {
    account: Option<Account>,
    storage: BTreeMap<Bytes32, Vec<u8>>,
    code: Option<Vec<u8>>,
}

/// Writable account state rooted at a committed account trie.
///
/// Reads consult the journal first and fall back to the trie-backed object
/// cache. Writes never touch the cache, so `revert_to` only has to truncate
/// the journal.
pub struct State {
    root: Bytes32,
    kv: Arc<dyn KvStore>,
    cache: Arc<TrieCache>,
    account_trie: MerkleTrie,
    objects: RefCell<HashMap<Address, CachedObject>>,
    journal: Journal<StateKey, StateValue>,
}

impl State {
    pub fn new(root: Bytes32, kv: Arc<dyn KvStore>, cache: Arc<TrieCache>) -> Result<Self, StateError> {
        let account_trie = MerkleTrie::open(root, kv.as_ref(), &cache)?;
        Ok(Self {
            root,
            kv,
            cache,
            account_trie,
            objects: RefCell::new(HashMap::new()),
            journal: Journal::new(),
        })
    }

    /// Root the state was opened at.
    pub fn root(&self) -> Bytes32 {
        self.root
    }

    // === BASE VIEW ===

    fn base_account(&self, addr: &Address) -> Result<Account, StateError> {
        if let Some(obj) = self.objects.borrow().get(addr) {
            return Ok(obj.account.clone());
        }
        let account = match self.account_trie.get(addr.as_bytes()) {
            Some(raw) => rlp::decode::<Account>(raw)?,
            None => Account::default(),
        };
        self.objects.borrow_mut().insert(
            *addr,
            CachedObject { account: account.clone(), storage: None, code: None },
        );
        Ok(account)
    }

    fn with_base_storage<R>(
        &self,
        addr: &Address,
        f: impl FnOnce(&MerkleTrie) -> R,
    ) -> Result<R, StateError> {
        let storage_root = self.base_account(addr)?.storage_root;
        let mut objects = self.objects.borrow_mut();
        let obj = objects.entry(*addr).or_insert_with(|| CachedObject {
            account: Account { storage_root, ..Account::default() },
            storage: None,
            code: None,
        });
        let trie = match obj.storage.take() {
            Some(trie) => trie,
            None => MerkleTrie::open(storage_root, self.kv.as_ref(), &self.cache)?,
        };
        let out = f(&trie);
        obj.storage = Some(trie);
        Ok(out)
    }

    fn base_code(&self, addr: &Address) -> Result<Vec<u8>, StateError> {
        let code_hash = self.base_account(addr)?.code_hash;
        if code_hash.is_zero() {
            return Ok(Vec::new());
        }
        if let Some(code) = self.objects.borrow().get(addr).and_then(|o| o.code.clone()) {
            return Ok(code);
        }
        let code = self
            .kv
            .get(&code_key(&code_hash))?
            .ok_or(StateError::MissingCode(code_hash))?;
        if let Some(obj) = self.objects.borrow_mut().get_mut(addr) {
            obj.code = Some(code.clone());
        }
        Ok(code)
    }

    // === ACCOUNTS ===

    pub fn get_account(&self, addr: &Address) -> Result<Account, StateError> {
        match self.journal.get(&StateKey::Account(*addr)) {
            Some(StateValue::Account(acc)) => Ok(acc.clone()),
            _ => self.base_account(addr),
        }
    }

    fn update_account(
        &mut self,
        addr: &Address,
        f: impl FnOnce(&mut Account),
    ) -> Result<(), StateError> {
        let mut account = self.get_account(addr)?;
        f(&mut account);
        self.journal.put(StateKey::Account(*addr), StateValue::Account(account));
        Ok(())
    }

    pub fn exists(&self, addr: &Address) -> Result<bool, StateError> {
        Ok(!self.get_account(addr)?.is_empty())
    }

    pub fn get_balance(&self, addr: &Address) -> Result<U256, StateError> {
        Ok(self.get_account(addr)?.balance)
    }

    pub fn set_balance(&mut self, addr: &Address, balance: U256) -> Result<(), StateError> {
        self.update_account(addr, |acc| acc.balance = balance)
    }

    pub fn get_master(&self, addr: &Address) -> Result<Address, StateError> {
        Ok(self.get_account(addr)?.master)
    }

    pub fn set_master(&mut self, addr: &Address, master: Address) -> Result<(), StateError> {
        self.update_account(addr, |acc| acc.master = master)
    }

    // === CODE ===

    pub fn get_code_hash(&self, addr: &Address) -> Result<Bytes32, StateError> {
        Ok(self.get_account(addr)?.code_hash)
    }

    pub fn get_code(&self, addr: &Address) -> Result<Vec<u8>, StateError> {
        match self.journal.get(&StateKey::Code(*addr)) {
            Some(StateValue::Code(code)) => Ok(code.clone()),
            _ => self.base_code(addr),
        }
    }

    pub fn set_code(&mut self, addr: &Address, code: Vec<u8>) -> Result<(), StateError> {
        let code_hash = if code.is_empty() { Bytes32::ZERO } else { keccak256(&code) };
        self.update_account(addr, |acc| acc.code_hash = code_hash)?;
        self.journal.put(StateKey::Code(*addr), StateValue::Code(code));
        Ok(())
    }

    // === STORAGE ===

    pub fn get_raw_storage(&self, addr: &Address, key: &Bytes32) -> Result<Vec<u8>, StateError> {
        match self.journal.get(&StateKey::Storage(*addr, *key)) {
            Some(StateValue::Storage(raw)) => Ok(raw.clone()),
            _ => self.with_base_storage(addr, |trie| {
                trie.get(key.as_bytes()).map(<[u8]>::to_vec).unwrap_or_default()
            }),
        }
    }

    /// Stores `value` verbatim; an empty value clears the slot.
    pub fn set_raw_storage(&mut self, addr: &Address, key: Bytes32, value: Vec<u8>) {
        self.journal.put(StateKey::Storage(*addr, key), StateValue::Storage(value));
    }

    pub fn get_storage(&self, addr: &Address, key: &Bytes32) -> Result<Bytes32, StateError> {
        let raw = self.get_raw_storage(addr, key)?;
        Ok(if raw.is_empty() { Bytes32::ZERO } else { Bytes32::left_padded(&raw) })
    }

    pub fn set_storage(&mut self, addr: &Address, key: Bytes32, value: Bytes32) {
        let raw = if value.is_zero() { Vec::new() } else { value.0.to_vec() };
        self.set_raw_storage(addr, key, raw);
    }

    // === CHECKPOINTS ===

    pub fn new_checkpoint(&mut self) -> usize {
        self.journal.new_checkpoint()
    }

    pub fn revert_to(&mut self, revision: usize) -> Result<(), StateError> {
        self.journal.revert_to(revision)
    }

    /// Folds the journal into account and storage trie updates.
    pub fn stage(&self) -> Result<Stage, StateError> {
        let mut changes: BTreeMap<Address, AccountChange> = BTreeMap::new();
        for (key, value) in self.journal.latest() {
            match (key, value) {
                (StateKey::Account(addr), StateValue::Account(acc)) => {
                    changes.entry(*addr).or_default().account = Some(acc.clone());
                }
                (StateKey::Storage(addr, slot), StateValue::Storage(raw)) => {
                    changes.entry(*addr).or_default().storage.insert(*slot, raw.clone());
                }
                (StateKey::Code(addr), StateValue::Code(code)) => {
                    changes.entry(*addr).or_default().code = Some(code.clone());
                }
                _ => {}
            }
        }

        let mut account_trie = self.account_trie.clone();
        let mut storage_tries = Vec::new();
        let mut codes = Vec::new();

        for (addr, change) in changes {
            let mut account = match change.account {
                Some(acc) => acc,
                None => self.base_account(&addr)?,
            };
            if let Some(code) = change.code {
                if !code.is_empty() {
                    codes.push((account.code_hash, code));
                }
            }
            if !change.storage.is_empty() {
                let mut trie = self.with_base_storage(&addr, MerkleTrie::clone)?;
                for (slot, raw) in change.storage {
                    trie.update(slot.as_bytes(), raw);
                }
                account.storage_root = trie.hash();
                storage_tries.push(trie);
            }
            let encoded = if account.is_empty() { Vec::new() } else { rlp::encode(&account).to_vec() };
            account_trie.update(addr.as_bytes(), encoded);
        }

        Ok(Stage::new(account_trie, storage_tries, codes, self.kv.clone(), self.cache.clone()))
    }
}

/// Opens [`State`]s over one store and its shared trie cache.
#[derive(Clone)]
pub struct StateCreator {
    kv: Arc<dyn KvStore>,
    cache: Arc<TrieCache>,
}

impl StateCreator {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv, cache: Arc::new(TrieCache::default()) }
    }

    pub fn with_cache(kv: Arc<dyn KvStore>, cache: Arc<TrieCache>) -> Self {
        Self { kv, cache }
    }

    pub fn new_state(&self, root: Bytes32) -> Result<State, StateError> {
        State::new(root, self.kv.clone(), self.cache.clone())
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }
}
