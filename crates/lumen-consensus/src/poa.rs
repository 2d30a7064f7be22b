//! Proof-of-Authority leader schedule.
//!
//! SAFETY INVARIANTS:
//! 1. The leader of a slot depends only on the parent block number, the slot
//!    timestamp and the ordered active set, so every node agrees on it.
//! 2. Legal block timestamps are `parent_time + k * interval` for `k >= 1`.
//! 3. The solo-streak jitter only moves the local proposal time; it is never
//!    consulted by [`Scheduler::is_the_time`].

use lumen_core::params::{param_key, KEY_PROPOSER_ENDORSEMENT};
use lumen_core::ChainParams;
use lumen_crypto::{blake2b256_concat, Address};
use lumen_state::{State, StateError};
use lumen_vm::{Authority, Candidate, Params};
use log::debug;
use rand::Rng;

use crate::error::SchedulerError;

/// Consecutive solo schedules before the proposal time is jittered.
pub const SOLO_STREAK_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposer {
    pub address: Address,
    pub active: bool,
}

impl From<&Candidate> for Proposer {
    fn from(c: &Candidate) -> Self {
        Proposer { address: c.node_master, active: c.active }
    }
}

/// Deterministic pseudo-random process: first eight bytes of
/// `blake2b(number ‖ time)` as a big-endian integer.
pub fn dprp(block_number: u32, time: u64) -> u64 {
    let hash = blake2b256_concat(&[&block_number.to_be_bytes(), &time.to_be_bytes()]);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.0[..8]);
    u64::from_be_bytes(head)
}

/// Node-local count of schedules made while this node was the only active
/// proposer.
#[derive(Debug, Default)]
pub struct SoloStreak {
    count: u32,
}

impl SoloStreak {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Records one schedule over `actives` proposers and reports whether
    /// jitter is due. The streak restarts once it fires.
    fn observe(&mut self, actives: usize) -> bool {
        if actives != 1 {
            self.count = 0;
            return false;
        }
        self.count += 1;
        if self.count >= SOLO_STREAK_THRESHOLD {
            self.count = 0;
            return true;
        }
        false
    }
}

/// Endorsed authority candidates at `state`, in listing order.
pub fn load_candidates(state: &State, params: &ChainParams) -> Result<Vec<Candidate>, StateError> {
    let threshold = Params::new(state).get(&param_key(KEY_PROPOSER_ENDORSEMENT))?;
    let max = usize::try_from(params.max_block_proposers).unwrap_or(usize::MAX);
    Authority::new(state).candidates(threshold, max)
}

/// Writes the proposer status changes computed by [`Scheduler::updates`].
pub fn apply_updates(state: &mut State, updates: &[Proposer]) -> Result<(), StateError> {
    let mut authority = Authority::new(state);
    for p in updates {
        authority.update(&p.address, p.active)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    proposer: Proposer,
    actives: Vec<Proposer>,
    parent_number: u32,
    parent_time: u64,
    interval: u64,
    max_proposers: u64,
}

impl Scheduler {
    /// Builds the schedule for `addr` on top of a parent block. The active
    /// set is `addr` plus every active proposer, in listing order.
    pub fn new(
        addr: Address,
        proposers: &[Proposer],
        parent_number: u32,
        parent_time: u64,
        params: &ChainParams,
    ) -> Result<Self, SchedulerError> {
        if params.block_interval == 0 {
            return Err(SchedulerError::ZeroInterval);
        }

        let mut proposer = None;
        let mut actives = Vec::with_capacity(proposers.len());
        for p in proposers {
            if p.address == addr {
                proposer = Some(*p);
                actives.push(*p);
            } else if p.active {
                actives.push(*p);
            }
        }
        let proposer = proposer.ok_or(SchedulerError::UnauthorizedProposer(addr))?;

        Ok(Self {
            proposer,
            actives,
            parent_number,
            parent_time,
            interval: params.block_interval,
            max_proposers: params.max_block_proposers,
        })
    }

    pub fn proposer(&self) -> &Proposer {
        &self.proposer
    }

    pub fn actives(&self) -> &[Proposer] {
        &self.actives
    }

    pub fn whose_turn(&self, t: u64) -> &Proposer {
        let index = dprp(self.parent_number, t) % self.actives.len() as u64;
        &self.actives[index as usize]
    }

    /// First slot at or after `now`, never before the parent's next slot.
    fn first_slot(&self, now: u64) -> u64 {
        let t = self.parent_time.saturating_add(self.interval);
        if now <= t {
            return t;
        }
        let behind = (now - t).div_ceil(self.interval);
        t.saturating_add(behind.saturating_mul(self.interval))
    }

    fn next_turn(&self, mut t: u64) -> u64 {
        while self.whose_turn(t).address != self.proposer.address {
            t += self.interval;
        }
        t
    }

    /// Earliest slot at or after `now` in which this proposer leads.
    pub fn schedule(&self, now: u64) -> u64 {
        self.next_turn(self.first_slot(now))
    }

    /// Like [`Scheduler::schedule`], but after a long solo streak pushes the
    /// slot forward by a random whole number of intervals below four.
    pub fn schedule_with_liveness(&self, now: u64, streak: &mut SoloStreak) -> u64 {
        let mut t = self.first_slot(now);
        if streak.observe(self.actives.len()) {
            let jitter = rand::thread_rng().gen_range(0..self.interval * 4) / self.interval * self.interval;
            debug!("solo proposer streak reached, delaying slot by {}s", jitter);
            t = t.saturating_add(jitter);
        }
        self.next_turn(t)
    }

    pub fn is_the_time(&self, t: u64) -> bool {
        if t <= self.parent_time {
            return false;
        }
        if (t - self.parent_time) % self.interval != 0 {
            return false;
        }
        self.whose_turn(t).address == self.proposer.address
    }

    /// Proposers whose status changes if a block is made at `new_time`, and
    /// the score of that block.
    ///
    /// Every leader of a skipped slot (at most `max_block_proposers` of them
    /// walking back from `new_time`) is deactivated; the proposer itself is
    /// reactivated if needed.
    pub fn updates(&self, new_time: u64) -> (Vec<Proposer>, u64) {
        let mut updates: Vec<Proposer> = Vec::new();
        let mut t = new_time.saturating_sub(self.interval);
        let mut steps = 0;
        while steps < self.max_proposers && t > self.parent_time {
            let leader = self.whose_turn(t);
            if leader.address != self.proposer.address && !updates.iter().any(|u| u.address == leader.address) {
                updates.push(Proposer { address: leader.address, active: false });
            }
            t = t.saturating_sub(self.interval);
            steps += 1;
        }

        let score = (self.actives.len() - updates.len()) as u64;
        if !self.proposer.active {
            updates.push(Proposer { address: self.proposer.address, active: true });
        }
        (updates, score)
    }
}
