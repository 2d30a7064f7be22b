use thiserror::Error;

/// Errors raised while decoding keys, hashes or signatures.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid signature length {0}")]
    InvalidSignatureLength(usize),

    #[error("secp256k1: {0}")]
    Secp256k1(#[from] secp256k1::Error),
}
