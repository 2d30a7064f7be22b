//! Recoverable secp256k1 signatures.
//!
//! Signatures are 65 bytes: the compact `r ‖ s` form followed by the
//! recovery id. Verification is done by recovering the signer address and
//! comparing it with the expected one.

use once_cell::sync::Lazy;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1};

pub use secp256k1::SecretKey;

use crate::error::CryptoError;
use crate::hash::keccak256;
use crate::types::{Address, Bytes32};

pub const SIGNATURE_LENGTH: usize = 65;

static SECP256K1: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

pub fn generate_secret_key() -> SecretKey {
    SecretKey::new(&mut rand::thread_rng())
}

pub fn secret_key_from_hex(s: &str) -> Result<SecretKey, CryptoError> {
    let raw = hex::decode(s.trim().trim_start_matches("0x"))?;
    Ok(SecretKey::from_slice(&raw)?)
}

fn address_of_public(pk: &PublicKey) -> Address {
    let uncompressed = pk.serialize_uncompressed();
    Address::left_padded(&keccak256(&uncompressed[1..]).0[12..])
}

/// Address controlled by `key`.
pub fn address_of(key: &SecretKey) -> Address {
    address_of_public(&PublicKey::from_secret_key(&SECP256K1, key))
}

pub fn sign(hash: &Bytes32, key: &SecretKey) -> Vec<u8> {
    let msg = Message::from_digest(hash.0);
    let (rec_id, compact) = SECP256K1.sign_ecdsa_recoverable(&msg, key).serialize_compact();
    let mut out = Vec::with_capacity(SIGNATURE_LENGTH);
    out.extend_from_slice(&compact);
    out.push(rec_id.to_i32() as u8);
    out
}

/// Recovers the address that produced `sig` over `hash`.
pub fn recover_address(hash: &Bytes32, sig: &[u8]) -> Result<Address, CryptoError> {
    if sig.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::InvalidSignatureLength(sig.len()));
    }
    let rec_id = RecoveryId::from_i32(i32::from(sig[64]))?;
    let rsig = RecoverableSignature::from_compact(&sig[..64], rec_id)?;
    let pk = SECP256K1.recover_ecdsa(&Message::from_digest(hash.0), &rsig)?;
    Ok(address_of_public(&pk))
}
