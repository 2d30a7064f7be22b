use lumen_crypto::{Address, Bytes32};
use primitive_types::U256;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use crate::trie::EMPTY_ROOT;

/// Account record stored in the account trie, RLP `[balance, master, code_hash, storage_root]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    /// Zero when no master is set.
    pub master: Address,
    /// Zero when the account carries no code.
    pub code_hash: Bytes32,
    pub storage_root: Bytes32,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            balance: U256::zero(),
            master: Address::ZERO,
            code_hash: Bytes32::ZERO,
            storage_root: EMPTY_ROOT,
        }
    }
}

impl Account {
    /// Empty accounts are removed from the trie instead of being stored.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero()
            && self.master.is_zero()
            && self.code_hash.is_zero()
            && self.storage_root == EMPTY_ROOT
    }
}

impl Encodable for Account {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.append(&self.balance);
        s.append(&self.master);
        s.append(&self.code_hash);
        s.append(&self.storage_root);
    }
}

impl Decodable for Account {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 4 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            balance: rlp.val_at(0)?,
            master: rlp.val_at(1)?,
            code_hash: rlp.val_at(2)?,
            storage_root: rlp.val_at(3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        assert!(Account::default().is_empty());
        let funded = Account { balance: U256::from(1u8), ..Account::default() };
        assert!(!funded.is_empty());
    }

    #[test]
    fn test_rlp_decode_rejects_short_list() {
        let mut s = RlpStream::new_list(2);
        s.append(&U256::from(1u8));
        s.append(&Address::ZERO);
        assert!(rlp::decode::<Account>(&s.out()).is_err());
    }

    #[test]
    fn test_rlp_preserves_fields() {
        let acc = Account {
            balance: U256::from(12345u64),
            master: Address([3u8; 20]),
            code_hash: Bytes32([4u8; 32]),
            storage_root: Bytes32([5u8; 32]),
        };
        assert_eq!(rlp::decode::<Account>(&rlp::encode(&acc)).unwrap(), acc);
    }
}
