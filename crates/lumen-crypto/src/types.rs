use std::fmt;
use std::str::FromStr;

use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

macro_rules! fixed_bytes {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;
            pub const ZERO: $name = $name([0u8; $len]);

            /// Copies `bytes` into a new value, failing unless the length matches exactly.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
                if bytes.len() != $len {
                    return Err(CryptoError::InvalidLength { expected: $len, got: bytes.len() });
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(bytes);
                Ok($name(out))
            }

            /// Right-aligns `bytes` into the value, keeping the trailing bytes when
            /// the input is longer than the value.
            pub fn left_padded(bytes: &[u8]) -> Self {
                let mut out = [0u8; $len];
                if bytes.len() >= $len {
                    out.copy_from_slice(&bytes[bytes.len() - $len..]);
                } else {
                    out[$len - bytes.len()..].copy_from_slice(bytes);
                }
                $name(out)
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::ZERO
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                $name(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl FromStr for $name {
            type Err = CryptoError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = hex::decode(strip_0x(s))?;
                $name::from_slice(&raw)
            }
        }

        impl Encodable for $name {
            fn rlp_append(&self, s: &mut RlpStream) {
                s.encoder().encode_value(&self.0);
            }
        }

        impl Decodable for $name {
            fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
                rlp.decoder().decode_value(|bytes| {
                    if bytes.len() != $len {
                        return Err(DecoderError::RlpInvalidLength);
                    }
                    let mut out = [0u8; $len];
                    out.copy_from_slice(bytes);
                    Ok($name(out))
                })
            }
        }
    };
}

fixed_bytes!(Bytes32, 32);
fixed_bytes!(Address, 20);

impl Bytes32 {
    /// Big-endian interpretation of the first four bytes. Block IDs and block
    /// references carry the block number there.
    pub fn prefix_u32(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}
