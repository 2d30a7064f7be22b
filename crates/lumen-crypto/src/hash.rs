use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use sha3::Keccak256;

use crate::types::Bytes32;

type Blake2b256 = Blake2b<U32>;

/// Blake2b with a 32-byte output, the chain's identity hash.
pub fn blake2b256(data: &[u8]) -> Bytes32 {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    Bytes32(hasher.finalize().into())
}

/// Hashes the concatenation of `parts` without allocating.
pub fn blake2b256_concat(parts: &[&[u8]]) -> Bytes32 {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    Bytes32(hasher.finalize().into())
}

pub fn keccak256(data: &[u8]) -> Bytes32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Bytes32(hasher.finalize().into())
}

/// Incremental Blake2b-256, used where the input is produced piecewise.
#[derive(Default)]
pub struct Blake2bHasher {
    inner: Blake2b256,
}

impl Blake2bHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.inner.update(data.as_ref());
        self
    }

    pub fn finalize(self) -> Bytes32 {
        Bytes32(self.inner.finalize().into())
    }
}
