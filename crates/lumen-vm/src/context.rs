use lumen_core::BlockRef;
use lumen_crypto::{Address, Bytes32};
use primitive_types::U256;

/// Block-level inputs visible to every transaction in the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    pub beneficiary: Address,
    pub signer: Address,
    pub number: u32,
    pub time: u64,
    pub gas_limit: u64,
    pub total_score: u64,
}

/// Transaction-level inputs shared by the clauses of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxContext {
    pub id: Bytes32,
    pub origin: Address,
    pub gas_price: U256,
    pub block_ref: BlockRef,
    pub expiration: u32,
}
