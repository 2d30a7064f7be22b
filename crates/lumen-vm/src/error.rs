use lumen_crypto::{Address, CryptoError};
use lumen_state::StateError;
use primitive_types::U256;
use thiserror::Error;

/// Clause-level failures. These never reject a block; they mark the
/// transaction's receipt as reverted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("out of gas")]
    OutOfGas,

    #[error("insufficient balance for transfer")]
    InsufficientBalance,

    #[error("execution interrupted")]
    Interrupted,

    #[error("contract address collision at {0}")]
    ContractAddressCollision(Address),

    #[error("unknown native method")]
    UnknownMethod,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("caller {0} is not authorized")]
    Unauthorized(Address),

    #[error("execution reverted: {0}")]
    Reverted(String),
}

/// Errors from a native method: either a clause failure or a storage fault
/// that must abort processing altogether.
#[derive(Debug, Error)]
pub enum NativeError {
    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<rlp::DecoderError> for NativeError {
    fn from(e: rlp::DecoderError) -> Self {
        NativeError::Vm(VmError::InvalidInput(e.to_string()))
    }
}

/// Errors that prevent a transaction from executing at all.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("intrinsic gas exceeds provided gas: want {want}, have {have}")]
    IntrinsicGasExceeded { want: u64, have: u64 },

    #[error("clause with value overflow")]
    ValueOverflow,

    #[error("insufficient balance to buy gas: {origin} needs {required}")]
    InsufficientGasFunds { origin: Address, required: U256 },

    #[error("no more clauses to execute")]
    NoMoreClauses,

    #[error("not all clauses processed")]
    Unfinished,

    #[error("execution task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    State(#[from] StateError),
}
