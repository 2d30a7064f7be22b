//! Cryptographic primitives shared by every Lumen crate.
//!
//! The chain identifies everything by 32-byte Blake2b digests, derives
//! account addresses the Ethereum way (Keccak-256 of the uncompressed
//! public key) and signs with recoverable secp256k1 signatures so that the
//! signer never has to be transmitted.

pub mod error;
pub mod hash;
pub mod signature;
pub mod types;

pub use error::CryptoError;
pub use hash::{blake2b256, blake2b256_concat, keccak256, Blake2bHasher};
pub use signature::{
    address_of, generate_secret_key, recover_address, secret_key_from_hex, sign, SecretKey,
    SIGNATURE_LENGTH,
};
pub use types::{Address, Bytes32};
