//! Ticker-driven block production for a single authority.
//!
//! On every tick the loop makes sure an open [`Flow`] sits on top of the
//! current best block, and once the flow's slot has arrived it fills the
//! block from a [`TxSource`], seals it, commits the state and appends the
//! block to the chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use lumen_core::{Block, Chain};
use lumen_crypto::SecretKey;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{AdoptError, PackLoopError};
use crate::flow::Flow;
use crate::miner::Miner;
use crate::pool::TxSource;

pub struct PackLoop {
    miner: Arc<Miner>,
    chain: Arc<Chain>,
    key: SecretKey,
    source: Arc<dyn TxSource>,
    tick_interval: Duration,
    flow: Option<Flow>,
}

impl PackLoop {
    pub fn new(miner: Arc<Miner>, key: SecretKey, source: Arc<dyn TxSource>) -> Self {
        let chain = miner.chain().clone();
        Self { miner, chain, key, source, tick_interval: Duration::from_secs(1), flow: None }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    /// Timestamp the open flow is waiting for.
    pub fn next_slot(&self) -> Option<u64> {
        self.flow.as_ref().map(Flow::when)
    }

    /// One step of the loop at wall-clock `now` (seconds). Returns the block
    /// packed in this step, if any.
    pub fn tick(&mut self, now: u64) -> Result<Option<Block>, PackLoopError> {
        let best = self.chain.best_header()?;
        let stale = self.flow.as_ref().map_or(true, |f| f.parent_header().id() != best.id());
        if stale {
            match self.miner.schedule(&best, now) {
                Ok(flow) => {
                    debug!("next slot at {} on top of #{}", flow.when(), best.number());
                    self.flow = Some(flow);
                }
                Err(e) if e.is_unauthorized_proposer() => {
                    debug!("not an authority at #{}: {}", best.number(), e);
                    self.flow = None;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let flow = match self.flow.take() {
            Some(flow) if now >= flow.when() => flow,
            other => {
                self.flow = other;
                return Ok(None);
            }
        };
        self.pack(flow).map(Some)
    }

    /// Most txs a single block takes, `block_interval * tx_per_second_limit`.
    fn max_txs_per_block(&self) -> usize {
        let params = self.miner.params();
        usize::try_from(params.block_interval.saturating_mul(params.tx_per_second_limit)).unwrap_or(usize::MAX)
    }

    fn pack(&mut self, mut flow: Flow) -> Result<Block, PackLoopError> {
        let started = Instant::now();
        let max_txs = self.max_txs_per_block();

        for tx in self.source.executables() {
            if flow.txs().len() >= max_txs {
                debug!("tx cap {} reached for #{}", max_txs, flow.number());
                break;
            }
            match flow.adopt(&tx) {
                Ok(()) => {}
                Err(AdoptError::GasLimitReached) => break,
                Err(e @ AdoptError::State(_)) => return Err(e.into()),
                Err(e) if e.is_terminal() || e.is_known_tx() => {
                    if let Ok(id) = tx.id() {
                        debug!("dropping tx {}: {}", id, e);
                        self.source.remove(&id);
                    }
                }
                Err(_) => {}
            }
        }

        let gas_limit = flow.gas_limit();
        let (block, stage, receipts) = flow.pack(&self.key)?;
        let elapsed = started.elapsed();
        let root = stage.commit()?;
        if root != block.header().state_root() {
            warn!("committed root {} differs from header {}", root, block.header().state_root());
        }

        for tx in block.transactions() {
            if let Ok(id) = tx.id() {
                self.source.remove(&id);
            }
        }
        let is_best = self.chain.add_block(block.clone(), receipts)?;
        self.miner.adjust_target_gas_limit(block.header().gas_used(), gas_limit, elapsed);

        info!(
            "📦 packed block #{} {} txs={} gas_used={} elapsed={:?} best={}",
            block.header().number(),
            block.id(),
            block.transactions().len(),
            block.header().gas_used(),
            elapsed,
            is_best
        );
        Ok(block)
    }

    /// Runs until `cancel` fires or `max_blocks` blocks are packed. `clock`
    /// supplies wall-clock seconds. Returns the number of blocks packed.
    pub async fn run<C>(
        mut self,
        cancel: CancellationToken,
        clock: C,
        max_blocks: Option<usize>,
    ) -> Result<usize, PackLoopError>
    where
        C: Fn() -> u64,
    {
        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut packed = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.tick(clock())?.is_some() {
                        packed += 1;
                        if max_blocks.is_some_and(|max| packed >= max) {
                            break;
                        }
                    }
                }
            }
        }

        info!("packing loop stopped after {} blocks", packed);
        Ok(packed)
    }
}
