//! Proof-of-Authority consensus for Lumen.
//!
//! [`poa::Scheduler`] decides who may propose at which timestamp;
//! [`Consensus`] re-checks that decision for received blocks and replays
//! their transactions.

pub mod consensus;
pub mod error;
pub mod genesis;
pub mod poa;

pub use consensus::Consensus;
pub use error::{ConsensusError, SchedulerError};
pub use genesis::GenesisBuilder;
pub use poa::{apply_updates, dprp, load_candidates, Proposer, Scheduler, SoloStreak, SOLO_STREAK_THRESHOLD};
