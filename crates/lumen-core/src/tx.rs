//! Transactions, clauses and receipts.

use std::fmt;

use lumen_crypto::{
    blake2b256, blake2b256_concat, recover_address, sign, Address, Bytes32, CryptoError, SecretKey,
};
use once_cell::sync::OnceCell;
use primitive_types::U256;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

use crate::params::{
    CLAUSE_GAS, CLAUSE_GAS_CONTRACT_CREATION, TX_DATA_NON_ZERO_GAS, TX_DATA_ZERO_GAS, TX_GAS,
};
use crate::root::derive_root;

fn append_optional<T: Encodable>(s: &mut RlpStream, value: &Option<T>) {
    match value {
        Some(v) => s.append(v),
        None => s.append_empty_data(),
    };
}

fn decode_optional<T: Decodable>(rlp: &Rlp, index: usize) -> Result<Option<T>, DecoderError> {
    let item = rlp.at(index)?;
    if item.is_empty() {
        Ok(None)
    } else {
        item.as_val().map(Some)
    }
}

fn expect_list_len(rlp: &Rlp, len: usize) -> Result<(), DecoderError> {
    if rlp.item_count()? != len {
        return Err(DecoderError::RlpIncorrectListLen);
    }
    Ok(())
}

// ============ BLOCK REFERENCE ============

/// First eight bytes of a block ID; the leading four carry the block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockRef(pub u64);

impl BlockRef {
    pub fn from_number(number: u32) -> Self {
        BlockRef(u64::from(number) << 32)
    }

    pub fn from_id(id: &Bytes32) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&id.0[..8]);
        BlockRef(u64::from_be_bytes(raw))
    }

    pub fn number(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

// ============ CLAUSE ============

/// One call, transfer or contract creation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Clause {
    /// `None` creates a contract whose code is `data`.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
}

impl Clause {
    pub fn new(to: Option<Address>) -> Self {
        Self { to, ..Self::default() }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn is_creating_contract(&self) -> bool {
        self.to.is_none()
    }
}

impl Encodable for Clause {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        append_optional(s, &self.to);
        s.append(&self.value);
        s.append(&self.data);
    }
}

impl Decodable for Clause {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_list_len(rlp, 3)?;
        Ok(Self { to: decode_optional(rlp, 0)?, value: rlp.val_at(1)?, data: rlp.val_at(2)? })
    }
}

fn data_gas(data: &[u8]) -> u64 {
    let zeros = data.iter().filter(|b| **b == 0).count() as u64;
    let non_zeros = data.len() as u64 - zeros;
    zeros.saturating_mul(TX_DATA_ZERO_GAS).saturating_add(non_zeros.saturating_mul(TX_DATA_NON_ZERO_GAS))
}

/// Gas charged before any clause runs.
pub fn intrinsic_gas(clauses: &[Clause]) -> u64 {
    if clauses.is_empty() {
        return TX_GAS + CLAUSE_GAS;
    }
    clauses.iter().fold(TX_GAS, |total, c| {
        let clause_gas = if c.is_creating_contract() { CLAUSE_GAS_CONTRACT_CREATION } else { CLAUSE_GAS };
        total.saturating_add(data_gas(&c.data)).saturating_add(clause_gas)
    })
}

// ============ TRANSACTION ============

#[derive(Debug, Clone, Default)]
struct TxCache {
    signing_hash: OnceCell<Bytes32>,
    signer: OnceCell<Address>,
    id: OnceCell<Bytes32>,
}

/// An immutable, possibly signed transaction.
///
/// The signing hash, signer and ID are derived on first use and memoised;
/// any modification goes through [`TxBuilder`] or [`Transaction::with_signature`]
/// and yields a fresh value with an empty cache.
#[derive(Clone)]
pub struct Transaction {
    chain_tag: u8,
    block_ref: BlockRef,
    expiration: u32,
    clauses: Vec<Clause>,
    gas: u64,
    depends_on: Option<Bytes32>,
    nonce: u64,
    reserved: Vec<Vec<u8>>,
    signature: Vec<u8>,
    cache: TxCache,
}

impl Transaction {
    pub fn chain_tag(&self) -> u8 {
        self.chain_tag
    }

    pub fn block_ref(&self) -> BlockRef {
        self.block_ref
    }

    pub fn expiration(&self) -> u32 {
        self.expiration
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn gas(&self) -> u64 {
        self.gas
    }

    pub fn depends_on(&self) -> Option<Bytes32> {
        self.depends_on
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn reserved(&self) -> &[Vec<u8>] {
        &self.reserved
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// A transaction without a block reference never expires.
    pub fn is_expired(&self, block_number: u32) -> bool {
        let ref_number = self.block_ref.number();
        if ref_number == 0 {
            return false;
        }
        u64::from(block_number) > u64::from(ref_number) + u64::from(self.expiration)
    }

    pub fn intrinsic_gas(&self) -> u64 {
        intrinsic_gas(&self.clauses)
    }

    fn append_body(&self, s: &mut RlpStream) {
        s.append(&self.chain_tag);
        s.append(&self.block_ref.0);
        s.append(&self.expiration);
        s.append_list::<Clause, _>(&self.clauses);
        s.append(&self.gas);
        append_optional(s, &self.depends_on);
        s.append(&self.nonce);
        s.append_list::<Vec<u8>, Vec<u8>>(&self.reserved);
    }

    pub fn signing_hash(&self) -> Bytes32 {
        *self.cache.signing_hash.get_or_init(|| {
            let mut s = RlpStream::new_list(8);
            self.append_body(&mut s);
            blake2b256(&s.out())
        })
    }

    pub fn signer(&self) -> Result<Address, CryptoError> {
        self.cache
            .signer
            .get_or_try_init(|| recover_address(&self.signing_hash(), &self.signature))
            .copied()
    }

    /// `blake2b(signing_hash ‖ signer)`.
    pub fn id(&self) -> Result<Bytes32, CryptoError> {
        self.cache
            .id
            .get_or_try_init(|| {
                let signer = self.signer()?;
                Ok::<_, CryptoError>(blake2b256_concat(&[
                    self.signing_hash().as_bytes(),
                    signer.as_bytes(),
                ]))
            })
            .copied()
    }

    pub fn with_signature(&self, signature: Vec<u8>) -> Transaction {
        Transaction { signature, cache: TxCache::default(), ..self.clone() }
    }

    pub fn sign(&self, key: &SecretKey) -> Transaction {
        self.with_signature(sign(&self.signing_hash(), key))
    }

    pub fn encoded_size(&self) -> usize {
        rlp::encode(self).len()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.signing_hash() == other.signing_hash() && self.signature == other.signature
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id().map(|id| id.to_string()).unwrap_or_else(|_| "N/A".into());
        f.debug_struct("Transaction")
            .field("id", &id)
            .field("chain_tag", &self.chain_tag)
            .field("block_ref", &self.block_ref.number())
            .field("expiration", &self.expiration)
            .field("clauses", &self.clauses.len())
            .field("gas", &self.gas)
            .field("depends_on", &self.depends_on)
            .field("nonce", &self.nonce)
            .finish()
    }
}

impl Encodable for Transaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(9);
        self.append_body(s);
        s.append(&self.signature);
    }
}

impl Decodable for Transaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_list_len(rlp, 9)?;
        Ok(Self {
            chain_tag: rlp.val_at(0)?,
            block_ref: BlockRef(rlp.val_at(1)?),
            expiration: rlp.val_at(2)?,
            clauses: rlp.list_at(3)?,
            gas: rlp.val_at(4)?,
            depends_on: decode_optional(rlp, 5)?,
            nonce: rlp.val_at(6)?,
            reserved: rlp.list_at(7)?,
            signature: rlp.val_at(8)?,
            cache: TxCache::default(),
        })
    }
}

/// Builds unsigned transactions.
#[derive(Debug, Clone, Default)]
pub struct TxBuilder {
    chain_tag: u8,
    block_ref: BlockRef,
    expiration: u32,
    clauses: Vec<Clause>,
    gas: u64,
    depends_on: Option<Bytes32>,
    nonce: u64,
    reserved: Vec<Vec<u8>>,
}

impl TxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain_tag(mut self, tag: u8) -> Self {
        self.chain_tag = tag;
        self
    }

    pub fn block_ref(mut self, block_ref: BlockRef) -> Self {
        self.block_ref = block_ref;
        self
    }

    pub fn expiration(mut self, expiration: u32) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn gas(mut self, gas: u64) -> Self {
        self.gas = gas;
        self
    }

    pub fn depends_on(mut self, id: Option<Bytes32>) -> Self {
        self.depends_on = id;
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Forward-compatible fields. Not accepted by the current protocol.
    pub fn reserved(mut self, reserved: Vec<Vec<u8>>) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn build(self) -> Transaction {
        Transaction {
            chain_tag: self.chain_tag,
            block_ref: self.block_ref,
            expiration: self.expiration,
            clauses: self.clauses,
            gas: self.gas,
            depends_on: self.depends_on,
            nonce: self.nonce,
            reserved: self.reserved,
            signature: Vec::new(),
            cache: TxCache::default(),
        }
    }
}

/// Merkle root over transactions in block order.
pub fn txs_root(txs: &[Transaction]) -> Bytes32 {
    derive_root(txs)
}

// ============ RECEIPTS ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub address: Address,
    pub topics: Vec<Bytes32>,
    pub data: Vec<u8>,
}

impl Encodable for Event {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.address);
        s.append_list::<Bytes32, _>(&self.topics);
        s.append(&self.data);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
}

impl Encodable for Transfer {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.sender);
        s.append(&self.recipient);
        s.append(&self.amount);
    }
}

/// Effects of one successfully executed clause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseOutput {
    pub events: Vec<Event>,
    pub transfers: Vec<Transfer>,
}

impl Encodable for ClauseOutput {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append_list::<Event, _>(&self.events);
        s.append_list::<Transfer, _>(&self.transfers);
    }
}

/// Result of executing a transaction. A reverted receipt carries no outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub gas_used: u64,
    pub gas_payer: Address,
    pub paid: U256,
    pub reward: U256,
    pub reverted: bool,
    pub outputs: Vec<ClauseOutput>,
}

impl Encodable for Receipt {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(6);
        s.append(&self.gas_used);
        s.append(&self.gas_payer);
        s.append(&self.paid);
        s.append(&self.reward);
        s.append(&u8::from(self.reverted));
        s.append_list::<ClauseOutput, _>(&self.outputs);
    }
}

pub fn receipts_root(receipts: &[Receipt]) -> Bytes32 {
    derive_root(receipts)
}
