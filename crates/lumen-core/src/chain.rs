//! Block store with best-block tracking and transaction lookup.
//!
//! Blocks are kept in memory and mirrored to the key/value store; on
//! restart the canonical branch is reloaded by walking back from the
//! persisted best block.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use lumen_crypto::Bytes32;
use lumen_state::{KvStore, WriteBatch};
use parking_lot::RwLock;

use crate::block::{number_of, Block, Header};
use crate::error::ChainError;
use crate::tx::Receipt;

const BLOCK_PREFIX: &[u8] = b"blk:";
const RECEIPTS_PREFIX: &[u8] = b"rcp:";
const BEST_KEY: &[u8] = b"best";

fn prefixed(prefix: &[u8], id: &Bytes32) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

/// Where a transaction landed relative to some chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxMeta {
    pub block_id: Bytes32,
    pub index: usize,
    pub reverted: bool,
}

#[derive(Debug, Clone, Copy)]
struct TxLocation {
    block_id: Bytes32,
    index: usize,
}

struct StoredBlock {
    block: Block,
    receipts: Vec<Receipt>,
}

struct ChainInner {
    blocks: HashMap<Bytes32, StoredBlock>,
    tx_locations: HashMap<Bytes32, Vec<TxLocation>>,
    best: Bytes32,
}

impl ChainInner {
    fn index(&mut self, block: Block, receipts: Vec<Receipt>) -> Result<(), ChainError> {
        let id = block.id();
        for (index, tx) in block.transactions().iter().enumerate() {
            self.tx_locations.entry(tx.id()?).or_default().push(TxLocation { block_id: id, index });
        }
        self.blocks.insert(id, StoredBlock { block, receipts });
        Ok(())
    }

    fn header(&self, id: &Bytes32) -> Option<&Header> {
        self.blocks.get(id).map(|b| b.block.header())
    }

    fn ancestor_id(&self, head: &Bytes32, number: u32) -> Option<Bytes32> {
        if number_of(head) < number {
            return None;
        }
        let mut cursor = *head;
        loop {
            let header = self.header(&cursor)?;
            if header.number() == number {
                return Some(cursor);
            }
            cursor = header.parent_id();
        }
    }
}

pub struct Chain {
    kv: Arc<dyn KvStore>,
    genesis_id: Bytes32,
    inner: RwLock<ChainInner>,
}

impl Chain {
    /// Opens the chain stored in `kv`, initialising it with `genesis` when
    /// the store is empty.
    pub fn open(kv: Arc<dyn KvStore>, genesis: Block) -> Result<Self, ChainError> {
        let genesis_id = genesis.id();
        let mut inner = ChainInner { blocks: HashMap::new(), tx_locations: HashMap::new(), best: genesis_id };

        match kv.get(BEST_KEY)? {
            None => {
                let mut batch = WriteBatch::new();
                batch.put(prefixed(BLOCK_PREFIX, &genesis_id), genesis.to_raw());
                batch.put(prefixed(RECEIPTS_PREFIX, &genesis_id), bincode::serialize(&Vec::<Receipt>::new())?);
                batch.put(BEST_KEY, genesis_id.as_bytes());
                kv.write_batch(batch)?;
                inner.index(genesis, Vec::new())?;
                info!("initialised chain with genesis {}", genesis_id);
            }
            Some(raw_best) => {
                let best = Bytes32::from_slice(&raw_best)
                    .map_err(|e| ChainError::Corrupted(e.to_string()))?;
                let mut cursor = best;
                loop {
                    let raw = kv.get(&prefixed(BLOCK_PREFIX, &cursor))?.ok_or(ChainError::NotFound(cursor))?;
                    let block = Block::from_raw(&raw)?;
                    let receipts: Vec<Receipt> = match kv.get(&prefixed(RECEIPTS_PREFIX, &cursor))? {
                        Some(raw) => bincode::deserialize(&raw)?,
                        None => return Err(ChainError::Corrupted(format!("receipts of {} missing", cursor))),
                    };
                    let parent = block.header().parent_id();
                    let number = block.header().number();
                    inner.index(block, receipts)?;
                    if number == 0 {
                        break;
                    }
                    cursor = parent;
                }
                if !inner.blocks.contains_key(&genesis_id) {
                    return Err(ChainError::GenesisMismatch { stored: cursor, given: genesis_id });
                }
                inner.best = best;
                info!("loaded chain, best block #{} {}", number_of(&best), best);
            }
        }

        Ok(Self { kv, genesis_id, inner: RwLock::new(inner) })
    }

    pub fn genesis_id(&self) -> Bytes32 {
        self.genesis_id
    }

    /// Last byte of the genesis ID; transactions must carry it.
    pub fn tag(&self) -> u8 {
        self.genesis_id.0[31]
    }

    pub fn best_block(&self) -> Result<Block, ChainError> {
        let inner = self.inner.read();
        inner
            .blocks
            .get(&inner.best)
            .map(|b| b.block.clone())
            .ok_or(ChainError::NotFound(inner.best))
    }

    pub fn best_header(&self) -> Result<Header, ChainError> {
        Ok(self.best_block()?.header().clone())
    }

    pub fn has_block(&self, id: &Bytes32) -> bool {
        self.inner.read().blocks.contains_key(id)
    }

    pub fn get_header(&self, id: &Bytes32) -> Result<Header, ChainError> {
        self.inner.read().header(id).cloned().ok_or(ChainError::NotFound(*id))
    }

    pub fn get_block(&self, id: &Bytes32) -> Result<Block, ChainError> {
        self.inner
            .read()
            .blocks
            .get(id)
            .map(|b| b.block.clone())
            .ok_or(ChainError::NotFound(*id))
    }

    pub fn get_receipts(&self, id: &Bytes32) -> Result<Vec<Receipt>, ChainError> {
        self.inner
            .read()
            .blocks
            .get(id)
            .map(|b| b.receipts.clone())
            .ok_or(ChainError::NotFound(*id))
    }

    /// ID of the block at `number` on the branch ending at `head`.
    pub fn ancestor_id(&self, head: &Bytes32, number: u32) -> Result<Bytes32, ChainError> {
        self.inner.read().ancestor_id(head, number).ok_or(ChainError::NotFound(*head))
    }

    /// Looks `tx_id` up on the branch ending at `head`.
    pub fn get_tx_meta(&self, tx_id: &Bytes32, head: &Bytes32) -> Option<TxMeta> {
        let inner = self.inner.read();
        let locations = inner.tx_locations.get(tx_id)?;
        locations.iter().find_map(|loc| {
            if inner.ancestor_id(head, number_of(&loc.block_id)) != Some(loc.block_id) {
                return None;
            }
            let reverted = inner
                .blocks
                .get(&loc.block_id)
                .and_then(|b| b.receipts.get(loc.index))
                .map(|r| r.reverted)
                .unwrap_or(false);
            Some(TxMeta { block_id: loc.block_id, index: loc.index, reverted })
        })
    }

    /// Stores `block`; returns whether it became the new best block. Adding a
    /// known block is a no-op.
    pub fn add_block(&self, block: Block, receipts: Vec<Receipt>) -> Result<bool, ChainError> {
        let id = block.id();
        let mut inner = self.inner.write();
        if inner.blocks.contains_key(&id) {
            return Ok(false);
        }
        let parent_id = block.header().parent_id();
        if !inner.blocks.contains_key(&parent_id) {
            return Err(ChainError::UnknownParent(parent_id));
        }

        let best_score = inner.header(&inner.best).map(Header::total_score).unwrap_or(0);
        let is_best = block.header().total_score() > best_score;

        let mut batch = WriteBatch::new();
        batch.put(prefixed(BLOCK_PREFIX, &id), block.to_raw());
        batch.put(prefixed(RECEIPTS_PREFIX, &id), bincode::serialize(&receipts)?);
        if is_best {
            batch.put(BEST_KEY, id.as_bytes());
        }
        self.kv.write_batch(batch)?;

        debug!("added block #{} {} (best: {})", block.header().number(), id, is_best);
        inner.index(block, receipts)?;
        if is_best {
            inner.best = id;
        }
        Ok(is_best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockBuilder;
    use crate::tx::{Receipt, TxBuilder};
    use lumen_crypto::{generate_secret_key, Address, SecretKey};
    use lumen_state::{MemKv, U256};

    fn genesis() -> Block {
        BlockBuilder::new().parent_id(Bytes32([0xff; 32])).timestamp(1000).gas_limit(10_000_000).build()
    }

    fn child(parent: &Header, score: u64, key: &SecretKey, txs: Vec<crate::tx::Transaction>) -> Block {
        BlockBuilder::new()
            .parent_id(parent.id())
            .timestamp(parent.timestamp() + 5)
            .total_score(score)
            .transactions(txs)
            .build()
            .sign(key)
    }

    fn receipt(reverted: bool) -> Receipt {
        Receipt {
            gas_used: 21_000,
            gas_payer: Address::ZERO,
            paid: U256::zero(),
            reward: U256::zero(),
            reverted,
            outputs: Vec::new(),
        }
    }

    #[test]
    fn test_best_block_follows_total_score() {
        let chain = Chain::open(Arc::new(MemKv::new()), genesis()).unwrap();
        let g = chain.best_header().unwrap();
        let key = generate_secret_key();

        let a = child(&g, 1, &key, vec![]);
        assert!(chain.add_block(a.clone(), vec![]).unwrap());
        let b = child(&g, 1, &generate_secret_key(), vec![]);
        assert!(!chain.add_block(b.clone(), vec![]).unwrap());
        assert_eq!(chain.best_block().unwrap().id(), a.id());

        let c = child(b.header(), 2, &key, vec![]);
        assert!(chain.add_block(c.clone(), vec![]).unwrap());
        assert_eq!(chain.best_block().unwrap().id(), c.id());
        assert!(!chain.add_block(c, vec![]).unwrap());
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let chain = Chain::open(Arc::new(MemKv::new()), genesis()).unwrap();
        let orphan = BlockBuilder::new().parent_id(Bytes32([1; 32])).build().sign(&generate_secret_key());
        assert!(matches!(chain.add_block(orphan, vec![]), Err(ChainError::UnknownParent(_))));
    }

    #[test]
    fn test_tx_meta_respects_branch() {
        let chain = Chain::open(Arc::new(MemKv::new()), genesis()).unwrap();
        let g = chain.best_header().unwrap();
        let key = generate_secret_key();
        let tx = TxBuilder::new().chain_tag(chain.tag()).gas(21_000).build().sign(&key);

        let a = child(&g, 1, &key, vec![tx.clone()]);
        chain.add_block(a.clone(), vec![receipt(true)]).unwrap();
        let b = child(&g, 1, &generate_secret_key(), vec![]);
        chain.add_block(b.clone(), vec![]).unwrap();

        let meta = chain.get_tx_meta(&tx.id().unwrap(), &a.id()).unwrap();
        assert_eq!(meta, TxMeta { block_id: a.id(), index: 0, reverted: true });
        assert!(chain.get_tx_meta(&tx.id().unwrap(), &b.id()).is_none());
        assert_eq!(chain.ancestor_id(&a.id(), 0).unwrap(), g.id());
    }

    #[test]
    fn test_reopen_restores_best_branch() {
        let kv: Arc<dyn KvStore> = Arc::new(MemKv::new());
        let key = generate_secret_key();
        let best = {
            let chain = Chain::open(kv.clone(), genesis()).unwrap();
            let g = chain.best_header().unwrap();
            let a = child(&g, 1, &key, vec![]);
            chain.add_block(a.clone(), vec![]).unwrap();
            let b = child(a.header(), 2, &key, vec![]);
            chain.add_block(b.clone(), vec![]).unwrap();
            b.id()
        };
        let reopened = Chain::open(kv, genesis()).unwrap();
        assert_eq!(reopened.best_block().unwrap().id(), best);
        assert_eq!(reopened.best_header().unwrap().number(), 2);
    }
}
