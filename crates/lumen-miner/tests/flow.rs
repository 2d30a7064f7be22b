use std::sync::Arc;
use std::time::Duration;

use lumen_consensus::{Consensus, GenesisBuilder};
use lumen_core::{receipts_root, BlockRef, Chain, ChainParams, Clause, Transaction, TxBuilder};
use lumen_crypto::{address_of, generate_secret_key, Address, Bytes32, SecretKey};
use lumen_miner::{AdoptError, Miner, PackError};
use lumen_state::{KvStore, MemKv, StateCreator, U256};
use lumen_vm::NativeRegistry;

const GENESIS_TIME: u64 = 1_000;

struct Harness {
    chain: Arc<Chain>,
    creator: StateCreator,
    registry: Arc<NativeRegistry>,
    miner: Miner,
    key: SecretKey,
}

fn harness_with(genesis: GenesisBuilder, key: SecretKey) -> Harness {
    let kv: Arc<dyn KvStore> = Arc::new(MemKv::new());
    let creator = StateCreator::new(kv.clone());
    let genesis = genesis.build(&creator).unwrap();
    let chain = Arc::new(Chain::open(kv, genesis).unwrap());
    let registry = Arc::new(NativeRegistry::with_builtins());
    let miner = Miner::new(
        chain.clone(),
        creator.clone(),
        registry.clone(),
        ChainParams::default(),
        address_of(&key),
        None,
    );
    Harness { chain, creator, registry, miner, key }
}

fn harness() -> Harness {
    let key = generate_secret_key();
    harness_with(GenesisBuilder::devnet(&[key], GENESIS_TIME), key)
}

fn transfer(h: &Harness, nonce: u64, value: u64) -> TxBuilder {
    TxBuilder::new()
        .chain_tag(h.chain.tag())
        .block_ref(BlockRef::from_number(0))
        .expiration(32)
        .gas(21_000)
        .nonce(nonce)
        .clause(Clause::new(Some(Address::left_padded(b"recipient"))).with_value(U256::from(value)))
}

fn signed(builder: TxBuilder, key: &SecretKey) -> Transaction {
    builder.build().sign(key)
}

#[test]
fn test_schedule_first_slot_after_genesis() {
    let h = harness();
    let parent = h.chain.best_header().unwrap();
    let flow = h.miner.schedule(&parent, GENESIS_TIME).unwrap();
    assert_eq!(flow.when(), GENESIS_TIME + 5);
    assert_eq!(flow.number(), 1);
    assert_eq!(flow.total_score(), 1);
    assert_eq!(flow.gas_limit(), parent.gas_limit());
    assert_eq!(flow.parent_header().id(), parent.id());
}

#[test]
fn test_schedule_skips_to_current_slot() {
    let h = harness();
    let parent = h.chain.best_header().unwrap();
    let flow = h.miner.schedule(&parent, GENESIS_TIME + 23).unwrap();
    assert_eq!(flow.when(), GENESIS_TIME + 25);
}

#[test]
fn test_unknown_node_master_is_unauthorized() {
    let h = harness();
    let outsider = generate_secret_key();
    let miner = Miner::new(
        h.chain.clone(),
        h.creator.clone(),
        h.registry.clone(),
        ChainParams::default(),
        address_of(&outsider),
        None,
    );
    let err = miner.schedule(&h.chain.best_header().unwrap(), GENESIS_TIME).err().unwrap();
    assert!(err.is_unauthorized_proposer());
}

#[test]
fn test_target_gas_limit_moves_one_step() {
    let h = harness();
    let parent = h.chain.best_header().unwrap();
    h.miner.set_target_gas_limit(u64::MAX);
    let flow = h.miner.schedule(&parent, GENESIS_TIME).unwrap();
    assert_eq!(flow.gas_limit(), parent.gas_limit() + parent.gas_limit() / 1024);

    h.miner.set_target_gas_limit(0);
    assert_eq!(h.miner.target_gas_limit(), None);
    let flow = h.miner.schedule(&parent, GENESIS_TIME).unwrap();
    assert_eq!(flow.gas_limit(), parent.gas_limit());
}

#[test]
fn test_adjust_target_gas_limit() {
    let h = harness();
    h.miner.adjust_target_gas_limit(1_000, 10_000_000, Duration::from_secs(1));
    assert_eq!(h.miner.target_gas_limit(), None);

    h.miner.adjust_target_gas_limit(6_000_000, 10_000_000, Duration::ZERO);
    assert_eq!(h.miner.target_gas_limit(), None);

    // two seconds of budget, one second spent
    h.miner.adjust_target_gas_limit(6_000_000, 10_000_000, Duration::from_secs(1));
    assert_eq!(h.miner.target_gas_limit(), Some(12_000_000));

    // an idle block drops the target again
    h.miner.adjust_target_gas_limit(0, 10_000_000, Duration::from_secs(1));
    assert_eq!(h.miner.target_gas_limit(), None);
    let parent = h.chain.best_header().unwrap();
    let flow = h.miner.schedule(&parent, GENESIS_TIME).unwrap();
    assert_eq!(flow.gas_limit(), parent.gas_limit());
}

#[test]
fn test_pack_and_process_agree() {
    let h = harness();
    let parent = h.chain.best_header().unwrap();
    let mut flow = h.miner.schedule(&parent, GENESIS_TIME).unwrap();
    flow.adopt(&signed(transfer(&h, 1, 1_000), &h.key)).unwrap();
    flow.adopt(&signed(transfer(&h, 2, 2_000), &h.key)).unwrap();
    assert_eq!(flow.txs().len(), 2);
    assert_eq!(flow.gas_used(), 42_000);

    let when = flow.when();
    let (block, stage, receipts) = flow.pack(&h.key).unwrap();
    assert_eq!(block.header().number(), 1);
    assert_eq!(block.header().timestamp(), when);
    assert_eq!(block.header().signer().unwrap(), address_of(&h.key));
    assert_eq!(block.header().state_root(), stage.hash());
    assert_eq!(block.header().receipts_root(), receipts_root(&receipts));

    let consensus = Consensus::new(h.chain.clone(), h.creator.clone(), h.registry.clone(), ChainParams::default());
    let (replayed, replayed_receipts) = consensus.process(&block, when).unwrap();
    assert_eq!(replayed.hash(), stage.hash());
    assert_eq!(replayed_receipts, receipts);
    assert_eq!(receipts.iter().map(|r| r.gas_used).sum::<u64>(), block.header().gas_used());
}

#[test]
fn test_double_adopt_is_known() {
    let h = harness();
    let mut flow = h.miner.schedule(&h.chain.best_header().unwrap(), GENESIS_TIME).unwrap();
    let tx = signed(transfer(&h, 1, 1), &h.key);
    flow.adopt(&tx).unwrap();
    assert!(flow.adopt(&tx).unwrap_err().is_known_tx());
    assert_eq!(flow.txs().len(), 1);
}

#[test]
fn test_tx_committed_on_parent_is_known() {
    let h = harness();
    let tx = signed(transfer(&h, 1, 1), &h.key);
    let mut flow = h.miner.schedule(&h.chain.best_header().unwrap(), GENESIS_TIME).unwrap();
    flow.adopt(&tx).unwrap();
    let (block, stage, receipts) = flow.pack(&h.key).unwrap();
    stage.commit().unwrap();
    assert!(h.chain.add_block(block.clone(), receipts).unwrap());

    let mut next = h.miner.schedule(block.header(), GENESIS_TIME + 5).unwrap();
    assert!(next.adopt(&tx).unwrap_err().is_known_tx());
}

#[test]
fn test_authority_keeps_proposing_after_spending() {
    let h = harness();
    let mut parent = h.chain.best_header().unwrap();
    for nonce in 1..=3 {
        let mut flow = h.miner.schedule(&parent, parent.timestamp()).unwrap();
        flow.adopt(&signed(transfer(&h, nonce, 1_000_000), &h.key)).unwrap();
        let (block, stage, receipts) = flow.pack(&h.key).unwrap();
        assert!(receipts.iter().all(|r| !r.reverted));
        stage.commit().unwrap();
        assert!(h.chain.add_block(block.clone(), receipts).unwrap());
        parent = block.header().clone();
    }
    assert_eq!(parent.number(), 3);
    assert!(h.miner.schedule(&parent, parent.timestamp()).is_ok());
}

#[test]
fn test_authorities_rotate_and_blocks_replay() {
    let keys = [generate_secret_key(), generate_secret_key(), generate_secret_key()];
    let kv: Arc<dyn KvStore> = Arc::new(MemKv::new());
    let creator = StateCreator::new(kv.clone());
    let genesis = GenesisBuilder::devnet(&keys, GENESIS_TIME).build(&creator).unwrap();
    let chain = Arc::new(Chain::open(kv, genesis).unwrap());
    let registry = Arc::new(NativeRegistry::with_builtins());
    let miners: Vec<Miner> = keys
        .iter()
        .map(|k| {
            Miner::new(chain.clone(), creator.clone(), registry.clone(), ChainParams::default(), address_of(k), None)
        })
        .collect();
    let consensus = Consensus::new(chain.clone(), creator.clone(), registry.clone(), ChainParams::default());

    let mut saw_deactivation = false;
    for round in 0..6u64 {
        let best = chain.best_header().unwrap();
        let flows: Vec<_> = miners
            .iter()
            .enumerate()
            .map(|(i, m)| (i, m.schedule(&best, best.timestamp()).unwrap()))
            .collect();
        // odd rounds take the latest slot so the leaders in between get skipped
        let (i, mut flow) = if round % 2 == 0 {
            flows.into_iter().min_by_key(|(_, f)| f.when()).unwrap()
        } else {
            flows.into_iter().max_by_key(|(_, f)| f.when()).unwrap()
        };
        let tx = TxBuilder::new()
            .chain_tag(chain.tag())
            .block_ref(BlockRef::from_number(best.number()))
            .expiration(32)
            .gas(21_000)
            .nonce(round)
            .clause(Clause::new(Some(Address::left_padded(b"recipient"))).with_value(U256::from(1u64)))
            .build()
            .sign(&keys[i]);
        flow.adopt(&tx).unwrap();

        let when = flow.when();
        let (block, stage, receipts) = flow.pack(&keys[i]).unwrap();
        assert_eq!(block.header().signer().unwrap(), address_of(&keys[i]));

        let (replayed, replayed_receipts) = consensus.process(&block, when).unwrap();
        assert_eq!(replayed.hash(), stage.hash());
        assert_eq!(replayed_receipts, receipts);

        let score = block.header().total_score() - best.total_score();
        assert!(score >= 1);
        saw_deactivation |= score < 3;

        stage.commit().unwrap();
        assert!(chain.add_block(block.clone(), receipts).unwrap());
    }
    assert!(saw_deactivation);
    assert_eq!(chain.best_header().unwrap().number(), 6);
}

#[test]
fn test_rejects_malformed_txs() {
    let h = harness();
    let mut flow = h.miner.schedule(&h.chain.best_header().unwrap(), GENESIS_TIME).unwrap();

    let wrong_tag = signed(transfer(&h, 1, 1).chain_tag(h.chain.tag().wrapping_add(1)), &h.key);
    assert!(matches!(flow.adopt(&wrong_tag), Err(AdoptError::BadTx(ref r)) if r == "chain tag mismatch"));

    let reserved = signed(transfer(&h, 2, 1).reserved(vec![vec![1]]), &h.key);
    assert!(flow.adopt(&reserved).unwrap_err().is_bad_tx());

    let unsigned = transfer(&h, 3, 1).build();
    assert!(flow.adopt(&unsigned).unwrap_err().is_bad_tx());

    let future = signed(transfer(&h, 4, 1).block_ref(BlockRef::from_number(2)), &h.key);
    assert!(flow.adopt(&future).unwrap_err().is_not_adoptable_now());

    let too_little_gas = signed(transfer(&h, 5, 1).gas(1_000), &h.key);
    assert!(flow.adopt(&too_little_gas).unwrap_err().is_bad_tx());

    assert!(flow.txs().is_empty());
    assert_eq!(flow.gas_used(), 0);
}

#[test]
fn test_gas_limit_rules() {
    let key = generate_secret_key();
    let h = harness_with(GenesisBuilder::devnet(&[key], GENESIS_TIME).gas_limit(1_000_000), key);
    let mut flow = h.miner.schedule(&h.chain.best_header().unwrap(), GENESIS_TIME).unwrap();

    let huge = signed(transfer(&h, 0, 1).gas(1_000_001), &h.key);
    assert!(flow.adopt(&huge).unwrap_err().is_not_adoptable_now());

    for nonce in 1..=43 {
        flow.adopt(&signed(transfer(&h, nonce, 1), &h.key)).unwrap();
    }
    assert_eq!(flow.gas_used(), 903_000);

    let big = signed(transfer(&h, 100, 1).gas(200_000), &h.key);
    assert!(flow.adopt(&big).unwrap_err().is_gas_limit_reached());
    flow.adopt(&signed(transfer(&h, 101, 1), &h.key)).unwrap();
}

#[test]
fn test_dependency_rules() {
    let h = harness();
    let pauper = generate_secret_key();
    let mut flow = h.miner.schedule(&h.chain.best_header().unwrap(), GENESIS_TIME).unwrap();

    let missing = signed(transfer(&h, 1, 1).depends_on(Some(Bytes32([9; 32]))), &h.key);
    assert!(flow.adopt(&missing).unwrap_err().is_not_adoptable_now());

    let ok = signed(transfer(&h, 2, 1), &h.key);
    flow.adopt(&ok).unwrap();
    let reverted = signed(transfer(&h, 3, 1), &pauper);
    flow.adopt(&reverted).unwrap();

    let after_ok = signed(transfer(&h, 4, 1).depends_on(Some(ok.id().unwrap())), &h.key);
    flow.adopt(&after_ok).unwrap();
    let after_reverted = signed(transfer(&h, 5, 1).depends_on(Some(reverted.id().unwrap())), &h.key);
    assert!(flow.adopt(&after_reverted).unwrap_err().is_not_adoptable_forever());
    assert_eq!(flow.txs().len(), 3);
}

#[test]
fn test_pack_with_foreign_key() {
    let h = harness();
    let flow = h.miner.schedule(&h.chain.best_header().unwrap(), GENESIS_TIME).unwrap();
    let foreign = generate_secret_key();
    match flow.pack(&foreign) {
        Err(PackError::KeyMismatch { expected, got }) => {
            assert_eq!(expected, address_of(&h.key));
            assert_eq!(got, address_of(&foreign));
        }
        other => panic!("unexpected pack result: {:?}", other.map(|(b, _, _)| b.id())),
    }
}
