//! Core chain types for Lumen: parameters, transactions, blocks and the
//! block store.

pub mod block;
pub mod chain;
pub mod error;
pub mod gas_limit;
pub mod params;
pub mod root;
pub mod tx;

pub use block::{number_of, Block, BlockBuilder, Header};
pub use chain::{Chain, TxMeta};
pub use error::ChainError;
pub use gas_limit::GasLimit;
pub use params::ChainParams;
pub use root::derive_root;
pub use tx::{
    intrinsic_gas, receipts_root, txs_root, BlockRef, Clause, ClauseOutput, Event, Receipt,
    Transaction, Transfer, TxBuilder,
};
