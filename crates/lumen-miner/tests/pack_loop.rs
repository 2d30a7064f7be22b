use std::sync::Arc;
use std::time::Duration;

use lumen_consensus::{Consensus, GenesisBuilder};
use lumen_core::{BlockRef, Chain, ChainParams, Clause, TxBuilder};
use lumen_crypto::{address_of, generate_secret_key, Address, SecretKey};
use lumen_miner::{MemPool, Miner, PackLoop, TxSource};
use lumen_state::{KvStore, MemKv, StateCreator, U256};
use lumen_vm::NativeRegistry;
use tokio_util::sync::CancellationToken;

const GENESIS_TIME: u64 = 1_000;

struct Node {
    chain: Arc<Chain>,
    creator: StateCreator,
    registry: Arc<NativeRegistry>,
    pool: Arc<MemPool>,
    key: SecretKey,
}

impl Node {
    fn new() -> Self {
        let key = generate_secret_key();
        let kv: Arc<dyn KvStore> = Arc::new(MemKv::new());
        let creator = StateCreator::new(kv.clone());
        let genesis = GenesisBuilder::devnet(&[key], GENESIS_TIME).build(&creator).unwrap();
        let chain = Arc::new(Chain::open(kv, genesis).unwrap());
        Self {
            chain,
            creator,
            registry: Arc::new(NativeRegistry::with_builtins()),
            pool: Arc::new(MemPool::new()),
            key,
        }
    }

    fn pack_loop(&self) -> PackLoop {
        self.pack_loop_with(ChainParams::default())
    }

    fn pack_loop_with(&self, params: ChainParams) -> PackLoop {
        let miner = Miner::new(
            self.chain.clone(),
            self.creator.clone(),
            self.registry.clone(),
            params,
            address_of(&self.key),
            None,
        );
        let source: Arc<dyn TxSource> = self.pool.clone();
        PackLoop::new(Arc::new(miner), self.key, source)
    }

    fn transfer(&self, nonce: u64, value: u64, from: &SecretKey) -> lumen_core::Transaction {
        TxBuilder::new()
            .chain_tag(self.chain.tag())
            .block_ref(BlockRef::from_number(0))
            .expiration(64)
            .gas(21_000)
            .nonce(nonce)
            .clause(Clause::new(Some(Address::left_padded(b"recipient"))).with_value(U256::from(value)))
            .build()
            .sign(from)
    }
}

#[test]
fn test_tick_waits_for_slot_then_packs() {
    let node = Node::new();
    let mut pack_loop = node.pack_loop();
    let tx = node.transfer(1, 10, &node.key);
    assert!(node.pool.add(tx.clone()));

    assert!(pack_loop.tick(GENESIS_TIME).unwrap().is_none());
    assert_eq!(pack_loop.next_slot(), Some(GENESIS_TIME + 5));
    assert!(pack_loop.tick(GENESIS_TIME + 4).unwrap().is_none());

    let block = pack_loop.tick(GENESIS_TIME + 5).unwrap().unwrap();
    assert_eq!(block.header().number(), 1);
    assert_eq!(block.transactions(), &[tx.clone()][..]);
    assert_eq!(node.chain.best_header().unwrap().id(), block.id());
    assert!(node.pool.is_empty());
    assert!(node.chain.get_tx_meta(&tx.id().unwrap(), &block.id()).is_some());

    // a peer would see the block as already known
    let consensus = Consensus::new(node.chain.clone(), node.creator.clone(), node.registry.clone(), ChainParams::default());
    assert!(consensus.process(&block, GENESIS_TIME + 5).unwrap_err().is_known_block());

    assert!(pack_loop.tick(GENESIS_TIME + 5).unwrap().is_none());
    assert_eq!(pack_loop.next_slot(), Some(GENESIS_TIME + 10));
}

#[test]
fn test_tick_drops_bad_txs_and_keeps_pending() {
    let node = Node::new();
    let mut pack_loop = node.pack_loop();

    let bad = TxBuilder::new()
        .chain_tag(node.chain.tag().wrapping_add(1))
        .gas(21_000)
        .clause(Clause::new(Some(Address::left_padded(b"x"))))
        .build()
        .sign(&node.key);
    let pending = TxBuilder::new()
        .chain_tag(node.chain.tag())
        .block_ref(BlockRef::from_number(3))
        .expiration(64)
        .gas(21_000)
        .clause(Clause::new(Some(Address::left_padded(b"x"))))
        .build()
        .sign(&node.key);
    assert!(node.pool.add(bad.clone()));
    assert!(node.pool.add(pending.clone()));

    pack_loop.tick(GENESIS_TIME).unwrap();
    let block = pack_loop.tick(GENESIS_TIME + 5).unwrap().unwrap();
    assert!(block.transactions().is_empty());
    assert!(!node.pool.contains(&bad.id().unwrap()));
    assert!(node.pool.contains(&pending.id().unwrap()));
}

#[test]
fn test_block_tx_count_is_capped() {
    let node = Node::new();
    // five seconds at one tx per second
    let mut pack_loop = node.pack_loop_with(ChainParams { tx_per_second_limit: 1, ..ChainParams::default() });
    for nonce in 0..7 {
        assert!(node.pool.add(node.transfer(nonce, 1, &node.key)));
    }

    pack_loop.tick(GENESIS_TIME).unwrap();
    let block = pack_loop.tick(GENESIS_TIME + 5).unwrap().unwrap();
    assert_eq!(block.transactions().len(), 5);
    assert_eq!(node.pool.len(), 2);

    let next = pack_loop.tick(GENESIS_TIME + 10).unwrap().unwrap();
    assert_eq!(next.transactions().len(), 2);
    assert!(node.pool.is_empty());
}

#[test]
fn test_outsider_never_packs() {
    let node = Node::new();
    let outsider = generate_secret_key();
    let miner = Miner::new(
        node.chain.clone(),
        node.creator.clone(),
        node.registry.clone(),
        ChainParams::default(),
        address_of(&outsider),
        None,
    );
    let source: Arc<dyn TxSource> = node.pool.clone();
    let mut pack_loop = PackLoop::new(Arc::new(miner), outsider, source);

    for now in GENESIS_TIME..GENESIS_TIME + 30 {
        assert!(pack_loop.tick(now).unwrap().is_none());
    }
    assert_eq!(pack_loop.next_slot(), None);
}

#[tokio::test(start_paused = true)]
async fn test_run_packs_requested_blocks() {
    let node = Node::new();
    let pack_loop = node.pack_loop();
    let start = tokio::time::Instant::now();
    let clock = move || GENESIS_TIME + start.elapsed().as_secs();

    let packed = pack_loop.run(CancellationToken::new(), clock, Some(3)).await.unwrap();
    assert_eq!(packed, 3);

    let best = node.chain.best_header().unwrap();
    assert_eq!(best.number(), 3);
    assert_eq!(best.timestamp(), GENESIS_TIME + 15);
    assert_eq!(best.total_score(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_cancel() {
    let node = Node::new();
    let pack_loop = node.pack_loop().with_tick(Duration::from_millis(500));
    let cancel = CancellationToken::new();
    let start = tokio::time::Instant::now();
    let clock = move || GENESIS_TIME + start.elapsed().as_secs();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        stopper.cancel();
    });

    let packed = pack_loop.run(cancel, clock, None).await.unwrap();
    assert_eq!(packed, 2);
    assert_eq!(node.chain.best_header().unwrap().number(), 2);
}
