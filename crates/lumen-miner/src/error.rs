use lumen_consensus::SchedulerError;
use lumen_core::ChainError;
use lumen_crypto::Address;
use lumen_state::StateError;
use thiserror::Error;

/// Outcome of a failed [`Flow::adopt`](crate::Flow::adopt).
///
/// `NotAdoptableNow` asks for a retry in a later block; `BadTx` and
/// `NotAdoptableForever` are final for the transaction.
#[derive(Debug, Error)]
pub enum AdoptError {
    #[error("bad tx: {0}")]
    BadTx(String),

    #[error("tx not adoptable now")]
    NotAdoptableNow,

    #[error("tx not adoptable forever")]
    NotAdoptableForever,

    #[error("gas limit reached")]
    GasLimitReached,

    #[error("known tx")]
    KnownTx,

    #[error(transparent)]
    State(#[from] StateError),
}

impl AdoptError {
    pub fn is_bad_tx(&self) -> bool {
        matches!(self, AdoptError::BadTx(_))
    }

    pub fn is_not_adoptable_now(&self) -> bool {
        matches!(self, AdoptError::NotAdoptableNow)
    }

    pub fn is_not_adoptable_forever(&self) -> bool {
        matches!(self, AdoptError::NotAdoptableForever)
    }

    pub fn is_gas_limit_reached(&self) -> bool {
        matches!(self, AdoptError::GasLimitReached)
    }

    pub fn is_known_tx(&self) -> bool {
        matches!(self, AdoptError::KnownTx)
    }

    /// The transaction will never be adoptable and can be dropped.
    pub fn is_terminal(&self) -> bool {
        self.is_bad_tx() || self.is_not_adoptable_forever()
    }
}

#[derive(Debug, Error)]
pub enum PackError {
    #[error("private key mismatch: node master {expected}, key of {got}")]
    KeyMismatch { expected: Address, got: Address },

    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl ScheduleError {
    pub fn is_unauthorized_proposer(&self) -> bool {
        matches!(self, ScheduleError::Scheduler(SchedulerError::UnauthorizedProposer(_)))
    }
}

/// Failures that stop the packing loop.
#[derive(Debug, Error)]
pub enum PackLoopError {
    #[error("schedule: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("pack: {0}")]
    Pack(#[from] PackError),

    #[error("adopt: {0}")]
    Adopt(#[from] AdoptError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    State(#[from] StateError),
}
