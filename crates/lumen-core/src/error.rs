use lumen_crypto::{Bytes32, CryptoError};
use lumen_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block {0} not found")]
    NotFound(Bytes32),

    #[error("parent {0} of block is unknown")]
    UnknownParent(Bytes32),

    #[error("genesis mismatch: stored {stored}, given {given}")]
    GenesisMismatch { stored: Bytes32, given: Bytes32 },

    #[error("corrupted chain data: {0}")]
    Corrupted(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("rlp decode: {0}")]
    Rlp(#[from] rlp::DecoderError),

    #[error("encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

impl ChainError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChainError::NotFound(_))
    }
}
