//! Block validation.
//!
//! A received block is checked against its parent in three stages: header
//! rules, proposer legitimacy under the PoA schedule, and a full replay of
//! its transactions whose results must match the declared roots. On success
//! the caller gets the same `(Stage, receipts)` pair a local packer would
//! have produced.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use lumen_core::{receipts_root, txs_root, Block, Chain, ChainParams, GasLimit, Header, Receipt, Transaction};
use lumen_crypto::Bytes32;
use lumen_state::{Stage, State, StateCreator};
use lumen_vm::{BlockContext, NativeRegistry, Runtime};

use crate::error::ConsensusError;
use crate::poa::{apply_updates, load_candidates, Proposer, Scheduler};

pub struct Consensus {
    chain: Arc<Chain>,
    state_creator: StateCreator,
    registry: Arc<NativeRegistry>,
    params: ChainParams,
}

impl Consensus {
    pub fn new(
        chain: Arc<Chain>,
        state_creator: StateCreator,
        registry: Arc<NativeRegistry>,
        params: ChainParams,
    ) -> Self {
        Self { chain, state_creator, registry, params }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Validates `block` received at wall-clock time `now` (seconds).
    pub fn process(&self, block: &Block, now: u64) -> Result<(Stage, Vec<Receipt>), ConsensusError> {
        let header = block.header();
        if self.chain.has_block(&header.id()) {
            return Err(ConsensusError::KnownBlock);
        }
        let parent = match self.chain.get_header(&header.parent_id()) {
            Ok(parent) => parent,
            Err(e) if e.is_not_found() => return Err(ConsensusError::ParentMissing),
            Err(e) => return Err(e.into()),
        };

        let mut state = self.state_creator.new_state(parent.state_root())?;
        self.validate_header(header, &parent, now)?;
        self.validate_proposer(header, &parent, &mut state)?;
        let (stage, receipts) = self.verify_body(block, &parent, state)?;

        info!(
            "validated block #{} {} ({} txs, score {})",
            header.number(),
            header.id(),
            block.transactions().len(),
            header.total_score()
        );
        Ok((stage, receipts))
    }

    /// Runtime positioned where the transactions of `header` execute: the
    /// parent's state with the proposer updates already applied.
    pub fn new_runtime_for_replay(&self, header: &Header) -> Result<Runtime, ConsensusError> {
        let parent = match self.chain.get_header(&header.parent_id()) {
            Ok(parent) => parent,
            Err(e) if e.is_not_found() => return Err(ConsensusError::ParentMissing),
            Err(e) => return Err(e.into()),
        };
        let mut state = self.state_creator.new_state(parent.state_root())?;
        self.validate_proposer(header, &parent, &mut state)?;
        let ctx = block_context(header)?;
        Ok(Runtime::new(state, ctx, self.registry.clone()))
    }

    fn validate_header(&self, header: &Header, parent: &Header, now: u64) -> Result<(), ConsensusError> {
        let interval = self.params.block_interval;
        let (ts, parent_ts) = (header.timestamp(), parent.timestamp());
        if ts <= parent_ts || (ts - parent_ts) % interval != 0 {
            return Err(ConsensusError::InvalidTimestamp { parent: parent_ts, current: ts });
        }
        if ts > now.saturating_add(interval) {
            return Err(ConsensusError::FutureBlock { timestamp: ts, now });
        }
        if !GasLimit(header.gas_limit()).is_valid(parent.gas_limit(), &self.params) {
            return Err(ConsensusError::InvalidGasLimit { parent: parent.gas_limit(), current: header.gas_limit() });
        }
        if header.gas_used() > header.gas_limit() {
            return Err(ConsensusError::GasUsedExceedsLimit { used: header.gas_used(), limit: header.gas_limit() });
        }
        if header.total_score() <= parent.total_score() {
            return Err(ConsensusError::InvalidTotalScore {
                want: parent.total_score() + 1,
                have: header.total_score(),
            });
        }
        Ok(())
    }

    fn validate_proposer(&self, header: &Header, parent: &Header, state: &mut State) -> Result<(), ConsensusError> {
        let signer = header.signer().map_err(ConsensusError::InvalidSignature)?;

        let proposers: Vec<Proposer> = load_candidates(state, &self.params)?.iter().map(Proposer::from).collect();
        let sched = Scheduler::new(signer, &proposers, parent.number(), parent.timestamp(), &self.params)?;
        if !sched.is_the_time(header.timestamp()) {
            return Err(ConsensusError::UnscheduledTimestamp { signer, timestamp: header.timestamp() });
        }

        let (updates, score) = sched.updates(header.timestamp());
        let want = parent.total_score() + score;
        if want != header.total_score() {
            return Err(ConsensusError::InvalidTotalScore { want, have: header.total_score() });
        }

        apply_updates(state, &updates)?;
        Ok(())
    }

    fn check_tx(&self, index: usize, tx: &Transaction, header: &Header) -> Result<(), ConsensusError> {
        let reason = if tx.chain_tag() != self.chain.tag() {
            "chain tag mismatch"
        } else if !tx.reserved().is_empty() {
            "reserved fields not empty"
        } else if tx.block_ref().number() > header.number() {
            "block ref out of range"
        } else if tx.is_expired(header.number()) {
            "expired"
        } else {
            return Ok(());
        };
        Err(ConsensusError::BadTxInBlock { index, reason })
    }

    fn verify_body(
        &self,
        block: &Block,
        parent: &Header,
        state: State,
    ) -> Result<(Stage, Vec<Receipt>), ConsensusError> {
        let header = block.header();
        let txs = block.transactions();

        let actual_txs_root = txs_root(txs);
        if actual_txs_root != header.txs_root() {
            return Err(ConsensusError::TxsRootMismatch { declared: header.txs_root(), actual: actual_txs_root });
        }

        let mut runtime = Runtime::new(state, block_context(header)?, self.registry.clone());
        let mut processed: HashMap<Bytes32, bool> = HashMap::new();
        let mut receipts = Vec::with_capacity(txs.len());
        let mut gas_used = 0u64;

        for (index, tx) in txs.iter().enumerate() {
            self.check_tx(index, tx, header)?;
            let id = tx.id().map_err(|e| ConsensusError::TxExecution { index, source: e.into() })?;

            if processed.contains_key(&id) || self.chain.get_tx_meta(&id, &parent.id()).is_some() {
                return Err(ConsensusError::KnownTxInBlock(id));
            }
            if let Some(dep) = tx.depends_on() {
                let reverted = match processed.get(&dep) {
                    Some(reverted) => Some(*reverted),
                    None => self.chain.get_tx_meta(&dep, &parent.id()).map(|meta| meta.reverted),
                };
                if reverted != Some(false) {
                    return Err(ConsensusError::DependencyBroken { tx: id, dependency: dep });
                }
            }

            let receipt = runtime
                .execute_transaction(tx)
                .map_err(|source| ConsensusError::TxExecution { index, source })?;
            gas_used += receipt.gas_used;
            processed.insert(id, receipt.reverted);
            receipts.push(receipt);
        }

        if gas_used != header.gas_used() {
            return Err(ConsensusError::GasUsedMismatch { declared: header.gas_used(), actual: gas_used });
        }
        let actual_receipts_root = receipts_root(&receipts);
        if actual_receipts_root != header.receipts_root() {
            return Err(ConsensusError::ReceiptsRootMismatch {
                declared: header.receipts_root(),
                actual: actual_receipts_root,
            });
        }
        let stage = runtime.state().stage()?;
        let actual_state_root = stage.hash();
        if actual_state_root != header.state_root() {
            return Err(ConsensusError::StateRootMismatch { declared: header.state_root(), actual: actual_state_root });
        }

        debug!("replayed {} txs of block {}, gas used {}", txs.len(), header.id(), gas_used);
        Ok((stage, receipts))
    }
}

fn block_context(header: &Header) -> Result<BlockContext, ConsensusError> {
    Ok(BlockContext {
        beneficiary: header.beneficiary(),
        signer: header.signer().map_err(ConsensusError::InvalidSignature)?,
        number: header.number(),
        time: header.timestamp(),
        gas_limit: header.gas_limit(),
        total_score: header.total_score(),
    })
}
