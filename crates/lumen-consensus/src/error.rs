use lumen_core::ChainError;
use lumen_crypto::{Address, Bytes32, CryptoError};
use lumen_state::StateError;
use lumen_vm::RuntimeError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("unauthorized block proposer {0}")]
    UnauthorizedProposer(Address),

    #[error("block interval must be positive")]
    ZeroInterval,
}

/// Why a block was not accepted.
///
/// `KnownBlock` and `ParentMissing` are signals rather than rejections: the
/// first is a no-op, the second asks the caller to fetch the parent.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("block already known")]
    KnownBlock,

    #[error("parent block missing")]
    ParentMissing,

    #[error("invalid timestamp: parent {parent}, current {current}")]
    InvalidTimestamp { parent: u64, current: u64 },

    #[error("block from the future: timestamp {timestamp}, now {now}")]
    FutureBlock { timestamp: u64, now: u64 },

    #[error("invalid gas limit: parent {parent}, current {current}")]
    InvalidGasLimit { parent: u64, current: u64 },

    #[error("gas used {used} exceeds gas limit {limit}")]
    GasUsedExceedsLimit { used: u64, limit: u64 },

    #[error("invalid total score: want {want}, have {have}")]
    InvalidTotalScore { want: u64, have: u64 },

    #[error("invalid block signature: {0}")]
    InvalidSignature(#[source] CryptoError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("proposer {signer} is not scheduled at {timestamp}")]
    UnscheduledTimestamp { signer: Address, timestamp: u64 },

    #[error("txs root mismatch: declared {declared}, actual {actual}")]
    TxsRootMismatch { declared: Bytes32, actual: Bytes32 },

    #[error("bad tx #{index} in block: {reason}")]
    BadTxInBlock { index: usize, reason: &'static str },

    #[error("tx {0} already known")]
    KnownTxInBlock(Bytes32),

    #[error("tx {tx} depends on missing or reverted tx {dependency}")]
    DependencyBroken { tx: Bytes32, dependency: Bytes32 },

    #[error("tx #{index} failed to execute: {source}")]
    TxExecution {
        index: usize,
        #[source]
        source: RuntimeError,
    },

    #[error("gas used mismatch: declared {declared}, actual {actual}")]
    GasUsedMismatch { declared: u64, actual: u64 },

    #[error("receipts root mismatch: declared {declared}, actual {actual}")]
    ReceiptsRootMismatch { declared: Bytes32, actual: Bytes32 },

    #[error("state root mismatch: declared {declared}, actual {actual}")]
    StateRootMismatch { declared: Bytes32, actual: Bytes32 },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl ConsensusError {
    pub fn is_known_block(&self) -> bool {
        matches!(self, ConsensusError::KnownBlock)
    }

    pub fn is_parent_missing(&self) -> bool {
        matches!(self, ConsensusError::ParentMissing)
    }

    pub fn is_future_block(&self) -> bool {
        matches!(self, ConsensusError::FutureBlock { .. })
    }

    pub fn is_unauthorized_proposer(&self) -> bool {
        matches!(self, ConsensusError::Scheduler(SchedulerError::UnauthorizedProposer(_)))
    }

    /// True when the block itself is invalid, as opposed to a signal or an
    /// internal storage failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            ConsensusError::KnownBlock
                | ConsensusError::ParentMissing
                | ConsensusError::Chain(_)
                | ConsensusError::State(_)
        )
    }
}
