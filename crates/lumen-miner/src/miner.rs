//! The authority side of PoA: deciding when this node proposes next and
//! preparing the state for that block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use lumen_consensus::{apply_updates, load_candidates, Proposer, Scheduler, SoloStreak};
use lumen_core::{Chain, ChainParams, GasLimit, Header};
use lumen_crypto::Address;
use lumen_state::StateCreator;
use lumen_vm::{BlockContext, NativeRegistry, Runtime};
use parking_lot::Mutex;

use crate::error::ScheduleError;
use crate::flow::Flow;

pub struct Miner {
    chain: Arc<Chain>,
    state_creator: StateCreator,
    registry: Arc<NativeRegistry>,
    params: ChainParams,
    node_master: Address,
    beneficiary: Option<Address>,
    target_gas_limit: AtomicU64,
    streak: Mutex<SoloStreak>,
}

impl Miner {
    pub fn new(
        chain: Arc<Chain>,
        state_creator: StateCreator,
        registry: Arc<NativeRegistry>,
        params: ChainParams,
        node_master: Address,
        beneficiary: Option<Address>,
    ) -> Self {
        Self {
            chain,
            state_creator,
            registry,
            params,
            node_master,
            beneficiary,
            target_gas_limit: AtomicU64::new(0),
            streak: Mutex::new(SoloStreak::new()),
        }
    }

    pub fn node_master(&self) -> Address {
        self.node_master
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    /// Zero means "follow the parent".
    pub fn set_target_gas_limit(&self, gas_limit: u64) {
        self.target_gas_limit.store(gas_limit, Ordering::Relaxed);
    }

    pub fn target_gas_limit(&self) -> Option<u64> {
        match self.target_gas_limit.load(Ordering::Relaxed) {
            0 => None,
            gl => Some(gl),
        }
    }

    /// Opens a packing flow for the next slot of this node on top of
    /// `parent`, with proposer updates already applied to the state.
    pub fn schedule(&self, parent: &Header, now: u64) -> Result<Flow, ScheduleError> {
        let mut state = self.state_creator.new_state(parent.state_root())?;

        let candidates = load_candidates(&state, &self.params)?;
        let beneficiary = match self.beneficiary {
            Some(b) => b,
            None => candidates
                .iter()
                .find(|c| c.node_master == self.node_master)
                .map(|c| c.endorsor)
                .unwrap_or(self.node_master),
        };
        let proposers: Vec<Proposer> = candidates.iter().map(Proposer::from).collect();

        let sched = Scheduler::new(self.node_master, &proposers, parent.number(), parent.timestamp(), &self.params)?;
        let new_time = sched.schedule_with_liveness(now, &mut self.streak.lock());
        let (updates, score) = sched.updates(new_time);
        apply_updates(&mut state, &updates)?;

        let gas_limit = match self.target_gas_limit() {
            Some(target) => GasLimit::toward(parent.gas_limit(), target, &self.params).0,
            None => parent.gas_limit(),
        };

        let ctx = BlockContext {
            beneficiary,
            signer: self.node_master,
            number: parent.number() + 1,
            time: new_time,
            gas_limit,
            total_score: parent.total_score() + score,
        };
        debug!(
            "scheduled block #{} at {} (actives {}, updates {}, score {})",
            ctx.number,
            new_time,
            sched.actives().len(),
            updates.len(),
            score
        );

        let runtime = Runtime::new(state, ctx, self.registry.clone());
        Ok(Flow::new(self.chain.clone(), self.node_master, parent.clone(), runtime))
    }

    /// Steers the target gas limit so that packing a full block stays within
    /// the tolerable packing time. A block at most a third full clears the
    /// target.
    pub fn adjust_target_gas_limit(&self, gas_used: u64, gas_limit: u64, elapsed: Duration) {
        let elapsed_ns = elapsed.as_nanos();
        if gas_used <= gas_limit / 3 || elapsed_ns == 0 {
            self.set_target_gas_limit(0);
            return;
        }
        let tolerable_ns = self.params.tolerable_block_packing_time().as_nanos();
        let target = tolerable_ns * u128::from(gas_used) / elapsed_ns;
        let target = u64::try_from(target).unwrap_or(u64::MAX).max(self.params.min_gas_limit);
        self.set_target_gas_limit(target);
        info!("target gas limit adjusted to {}", target);
    }
}
