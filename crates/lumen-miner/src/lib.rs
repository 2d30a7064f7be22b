//! Block production for Lumen authorities.
//!
//! [`Miner::schedule`] opens a [`Flow`] for this node's next slot, the flow
//! adopts transactions and packs a signed block, and [`PackLoop`] drives
//! both from a ticker.

pub mod error;
pub mod flow;
pub mod miner;
pub mod pack_loop;
pub mod pool;

pub use error::{AdoptError, PackError, PackLoopError, ScheduleError};
pub use flow::Flow;
pub use miner::Miner;
pub use pack_loop::PackLoop;
pub use pool::{MemPool, TxSource};
