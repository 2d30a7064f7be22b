//! One block-packing session.
//!
//! A [`Flow`] is opened by [`Miner::schedule`](crate::Miner::schedule) for a
//! fixed parent, timestamp and gas limit. Transactions are adopted one by
//! one; each runs under a state checkpoint so a transaction that cannot be
//! executed leaves no trace. [`Flow::pack`] seals the result.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};
use lumen_core::{receipts_root, Block, BlockBuilder, Chain, Header, Receipt, Transaction};
use lumen_crypto::{address_of, Address, Bytes32, SecretKey};
use lumen_state::Stage;
use lumen_vm::Runtime;

use crate::error::{AdoptError, PackError};

pub struct Flow {
    chain: Arc<Chain>,
    node_master: Address,
    parent: Header,
    runtime: Runtime,
    processed: HashMap<Bytes32, bool>,
    gas_used: u64,
    txs: Vec<Transaction>,
    receipts: Vec<Receipt>,
}

impl Flow {
    pub(crate) fn new(chain: Arc<Chain>, node_master: Address, parent: Header, runtime: Runtime) -> Self {
        Self {
            chain,
            node_master,
            parent,
            runtime,
            processed: HashMap::new(),
            gas_used: 0,
            txs: Vec::new(),
            receipts: Vec::new(),
        }
    }

    pub fn parent_header(&self) -> &Header {
        &self.parent
    }

    /// Timestamp of the block being packed.
    pub fn when(&self) -> u64 {
        self.runtime.context().time
    }

    pub fn number(&self) -> u32 {
        self.runtime.context().number
    }

    pub fn gas_limit(&self) -> u64 {
        self.runtime.context().gas_limit
    }

    pub fn total_score(&self) -> u64 {
        self.runtime.context().total_score
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn txs(&self) -> &[Transaction] {
        &self.txs
    }

    /// Whether `tx_id` was adopted in this flow or is on the parent's
    /// branch, and if so whether it reverted.
    fn find_tx(&self, tx_id: &Bytes32) -> Option<bool> {
        if let Some(reverted) = self.processed.get(tx_id) {
            return Some(*reverted);
        }
        self.chain.get_tx_meta(tx_id, &self.parent.id()).map(|meta| meta.reverted)
    }

    /// Executes `tx` and adds it to the block. Execution errors inside
    /// clauses do not fail adoption; they produce a reverted receipt.
    pub fn adopt(&mut self, tx: &Transaction) -> Result<(), AdoptError> {
        let number = self.number();
        let gas_limit = self.gas_limit();

        if tx.chain_tag() != self.chain.tag() {
            return Err(AdoptError::BadTx("chain tag mismatch".into()));
        }
        if !tx.reserved().is_empty() {
            return Err(AdoptError::BadTx("reserved fields not empty".into()));
        }
        if tx.block_ref().number() > number {
            return Err(AdoptError::NotAdoptableNow);
        }
        if tx.is_expired(number) {
            return Err(AdoptError::BadTx("expired".into()));
        }
        if self.gas_used.saturating_add(tx.gas()) > gas_limit {
            // below 90% utilisation a smaller tx may still fit
            if u128::from(self.gas_used) * 10 < u128::from(gas_limit) * 9 {
                return Err(AdoptError::NotAdoptableNow);
            }
            return Err(AdoptError::GasLimitReached);
        }

        let id = tx.id().map_err(|e| AdoptError::BadTx(e.to_string()))?;
        if self.find_tx(&id).is_some() {
            return Err(AdoptError::KnownTx);
        }
        if let Some(dep) = tx.depends_on() {
            match self.find_tx(&dep) {
                None => return Err(AdoptError::NotAdoptableNow),
                Some(true) => return Err(AdoptError::NotAdoptableForever),
                Some(false) => {}
            }
        }

        let checkpoint = self.runtime.state_mut().new_checkpoint();
        let receipt = match self.runtime.execute_transaction(tx) {
            Ok(receipt) => receipt,
            Err(e) => {
                self.runtime.state_mut().revert_to(checkpoint)?;
                trace!("tx {} rejected: {}", id, e);
                return Err(AdoptError::BadTx(e.to_string()));
            }
        };

        self.processed.insert(id, receipt.reverted);
        self.gas_used += receipt.gas_used;
        self.receipts.push(receipt);
        self.txs.push(tx.clone());
        Ok(())
    }

    /// Signs the block with `key`, which must belong to the node master.
    pub fn pack(self, key: &SecretKey) -> Result<(Block, Stage, Vec<Receipt>), PackError> {
        let signer = address_of(key);
        if signer != self.node_master {
            return Err(PackError::KeyMismatch { expected: self.node_master, got: signer });
        }

        let stage = self.runtime.state().stage()?;
        let ctx = self.runtime.context();
        let block = BlockBuilder::new()
            .beneficiary(ctx.beneficiary)
            .gas_limit(ctx.gas_limit)
            .parent_id(self.parent.id())
            .timestamp(ctx.time)
            .total_score(ctx.total_score)
            .gas_used(self.gas_used)
            .receipts_root(receipts_root(&self.receipts))
            .state_root(stage.hash())
            .transactions(self.txs)
            .build()
            .sign(key);

        debug!("packed block #{} {} with {} txs", block.header().number(), block.id(), self.receipts.len());
        Ok((block, stage, self.receipts))
    }
}
