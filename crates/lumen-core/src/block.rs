//! Block headers and blocks.
//!
//! SAFETY INVARIANTS:
//! 1. The block number is never stored; it is `parent_id[0..4] + 1`.
//! 2. The signing hash covers every header field except the signature.
//! 3. The block ID is `blake2b(signing_hash ‖ signer)` with its first four
//!    bytes overwritten by the block number, so IDs sort by height.

use std::fmt;

use lumen_crypto::{blake2b256, blake2b256_concat, recover_address, sign, Address, Bytes32, CryptoError, SecretKey};
use once_cell::sync::OnceCell;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use crate::tx::{txs_root, Transaction};

/// Block number carried in the first four bytes of a block ID.
pub fn number_of(id: &Bytes32) -> u32 {
    id.prefix_u32()
}

#[derive(Debug, Clone, Default)]
struct HeaderCache {
    signing_hash: OnceCell<Bytes32>,
    signer: OnceCell<Address>,
    id: OnceCell<Bytes32>,
}

#[derive(Clone)]
pub struct Header {
    parent_id: Bytes32,
    timestamp: u64,
    gas_limit: u64,
    beneficiary: Address,
    gas_used: u64,
    total_score: u64,
    txs_root: Bytes32,
    state_root: Bytes32,
    receipts_root: Bytes32,
    signature: Vec<u8>,
    cache: HeaderCache,
}

impl Header {
    pub fn parent_id(&self) -> Bytes32 {
        self.parent_id
    }

    /// Genesis uses a parent ID of `0xffffffff..` so that it is number 0.
    pub fn number(&self) -> u32 {
        number_of(&self.parent_id).wrapping_add(1)
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn beneficiary(&self) -> Address {
        self.beneficiary
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn total_score(&self) -> u64 {
        self.total_score
    }

    pub fn txs_root(&self) -> Bytes32 {
        self.txs_root
    }

    pub fn state_root(&self) -> Bytes32 {
        self.state_root
    }

    pub fn receipts_root(&self) -> Bytes32 {
        self.receipts_root
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn append_body(&self, s: &mut RlpStream) {
        s.append(&self.parent_id);
        s.append(&self.timestamp);
        s.append(&self.gas_limit);
        s.append(&self.beneficiary);
        s.append(&self.gas_used);
        s.append(&self.total_score);
        s.append(&self.txs_root);
        s.append(&self.state_root);
        s.append(&self.receipts_root);
    }

    pub fn signing_hash(&self) -> Bytes32 {
        *self.cache.signing_hash.get_or_init(|| {
            let mut s = RlpStream::new_list(9);
            self.append_body(&mut s);
            blake2b256(&s.out())
        })
    }

    /// Recovers the proposer. The genesis header has no signer and reports
    /// the zero address.
    pub fn signer(&self) -> Result<Address, CryptoError> {
        if self.number() == 0 {
            return Ok(Address::ZERO);
        }
        self.cache
            .signer
            .get_or_try_init(|| recover_address(&self.signing_hash(), &self.signature))
            .copied()
    }

    /// When the signer cannot be recovered the ID degrades to the block
    /// number followed by zeros; such a header never passes validation.
    pub fn id(&self) -> Bytes32 {
        *self.cache.id.get_or_init(|| {
            let mut id = match self.signer() {
                Ok(signer) => blake2b256_concat(&[self.signing_hash().as_bytes(), signer.as_bytes()]),
                Err(_) => Bytes32::ZERO,
            };
            id.0[..4].copy_from_slice(&self.number().to_be_bytes());
            id
        })
    }

    pub fn with_signature(&self, signature: Vec<u8>) -> Header {
        Header { signature, cache: HeaderCache::default(), ..self.clone() }
    }
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.signing_hash() == other.signing_hash() && self.signature == other.signature
    }
}

impl Eq for Header {}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("id", &self.id())
            .field("number", &self.number())
            .field("parent_id", &self.parent_id)
            .field("timestamp", &self.timestamp)
            .field("gas_limit", &self.gas_limit)
            .field("gas_used", &self.gas_used)
            .field("total_score", &self.total_score)
            .field("beneficiary", &self.beneficiary)
            .field("state_root", &self.state_root)
            .finish()
    }
}

impl Encodable for Header {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(10);
        self.append_body(s);
        s.append(&self.signature);
    }
}

impl Decodable for Header {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 10 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            parent_id: rlp.val_at(0)?,
            timestamp: rlp.val_at(1)?,
            gas_limit: rlp.val_at(2)?,
            beneficiary: rlp.val_at(3)?,
            gas_used: rlp.val_at(4)?,
            total_score: rlp.val_at(5)?,
            txs_root: rlp.val_at(6)?,
            state_root: rlp.val_at(7)?,
            receipts_root: rlp.val_at(8)?,
            signature: rlp.val_at(9)?,
            cache: HeaderCache::default(),
        })
    }
}

/// Header plus body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    header: Header,
    txs: Vec<Transaction>,
}

impl Block {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.txs
    }

    pub fn id(&self) -> Bytes32 {
        self.header.id()
    }

    pub fn with_signature(&self, signature: Vec<u8>) -> Block {
        Block { header: self.header.with_signature(signature), txs: self.txs.clone() }
    }

    pub fn sign(&self, key: &SecretKey) -> Block {
        self.with_signature(sign(&self.header.signing_hash(), key))
    }

    pub fn into_parts(self) -> (Header, Vec<Transaction>) {
        (self.header, self.txs)
    }

    pub fn to_raw(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    pub fn from_raw(raw: &[u8]) -> Result<Block, DecoderError> {
        rlp::decode(raw)
    }

    /// Decodes only the header of a raw block.
    pub fn decode_header(raw: &[u8]) -> Result<Header, DecoderError> {
        Rlp::new(raw).val_at(0)
    }
}

impl Encodable for Block {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.header);
        s.append_list::<Transaction, _>(&self.txs);
    }
}

impl Decodable for Block {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self { header: rlp.val_at(0)?, txs: rlp.list_at(1)? })
    }
}

/// Assembles an unsigned block; the transaction root is computed on build.
#[derive(Debug, Clone, Default)]
pub struct BlockBuilder {
    parent_id: Bytes32,
    timestamp: u64,
    gas_limit: u64,
    beneficiary: Address,
    gas_used: u64,
    total_score: u64,
    state_root: Bytes32,
    receipts_root: Bytes32,
    txs: Vec<Transaction>,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent_id(mut self, id: Bytes32) -> Self {
        self.parent_id = id;
        self
    }

    pub fn timestamp(mut self, ts: u64) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn gas_limit(mut self, gl: u64) -> Self {
        self.gas_limit = gl;
        self
    }

    pub fn beneficiary(mut self, addr: Address) -> Self {
        self.beneficiary = addr;
        self
    }

    pub fn gas_used(mut self, used: u64) -> Self {
        self.gas_used = used;
        self
    }

    pub fn total_score(mut self, score: u64) -> Self {
        self.total_score = score;
        self
    }

    pub fn state_root(mut self, root: Bytes32) -> Self {
        self.state_root = root;
        self
    }

    pub fn receipts_root(mut self, root: Bytes32) -> Self {
        self.receipts_root = root;
        self
    }

    pub fn transaction(mut self, tx: Transaction) -> Self {
        self.txs.push(tx);
        self
    }

    pub fn transactions(mut self, txs: impl IntoIterator<Item = Transaction>) -> Self {
        self.txs.extend(txs);
        self
    }

    pub fn build(self) -> Block {
        let header = Header {
            parent_id: self.parent_id,
            timestamp: self.timestamp,
            gas_limit: self.gas_limit,
            beneficiary: self.beneficiary,
            gas_used: self.gas_used,
            total_score: self.total_score,
            txs_root: txs_root(&self.txs),
            state_root: self.state_root,
            receipts_root: self.receipts_root,
            signature: Vec::new(),
            cache: HeaderCache::default(),
        };
        Block { header, txs: self.txs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TxBuilder;
    use lumen_crypto::{address_of, generate_secret_key};

    fn parent_with_number(n: u32) -> Bytes32 {
        let mut raw = [0xabu8; 32];
        raw[..4].copy_from_slice(&n.to_be_bytes());
        Bytes32(raw)
    }

    #[test]
    fn test_number_is_derived_from_parent() {
        let block = BlockBuilder::new().parent_id(parent_with_number(41)).build();
        assert_eq!(block.header().number(), 42);
        let genesis = BlockBuilder::new().parent_id(Bytes32([0xff; 32])).build();
        assert_eq!(genesis.header().number(), 0);
        assert_eq!(genesis.header().signer().unwrap(), Address::ZERO);
    }

    #[test]
    fn test_id_layout() {
        let key = generate_secret_key();
        let block = BlockBuilder::new()
            .parent_id(parent_with_number(9))
            .timestamp(1000)
            .gas_limit(10_000_000)
            .build()
            .sign(&key);
        let header = block.header();
        assert_eq!(header.signer().unwrap(), address_of(&key));

        let id = header.id();
        assert_eq!(number_of(&id), 10);
        let full = blake2b256_concat(&[header.signing_hash().as_bytes(), address_of(&key).as_bytes()]);
        assert_eq!(&id.0[4..], &full.0[4..]);
    }

    #[test]
    fn test_signature_changes_id_not_signing_hash() {
        let unsigned = BlockBuilder::new().parent_id(parent_with_number(1)).build();
        let a = unsigned.sign(&generate_secret_key());
        let b = unsigned.sign(&generate_secret_key());
        assert_eq!(a.header().signing_hash(), b.header().signing_hash());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_raw_round_trip_keeps_id_and_txs_root() {
        let key = generate_secret_key();
        let tx = TxBuilder::new().gas(21_000).nonce(3).build().sign(&key);
        let block = BlockBuilder::new()
            .parent_id(parent_with_number(5))
            .timestamp(55)
            .transaction(tx)
            .build()
            .sign(&key);

        let raw = block.to_raw();
        let decoded = Block::from_raw(&raw).unwrap();
        assert_eq!(decoded.id(), block.id());
        assert_eq!(decoded.header().txs_root(), txs_root(decoded.transactions()));
        assert_eq!(Block::decode_header(&raw).unwrap().id(), block.id());
    }
}
