//! Protocol constants and chain-wide parameters.
//!
//! Everything in [`ChainParams`] is part of consensus: two nodes with
//! different values will disagree on the schedule or on block validity.

use std::time::Duration;

use lumen_crypto::Bytes32;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

// ============ GAS SCHEDULE ============

/// Base cost of every transaction.
pub const TX_GAS: u64 = 5_000;
/// Per-clause cost for calls and transfers.
pub const CLAUSE_GAS: u64 = 21_000 - TX_GAS;
/// Per-clause cost for contract creation.
pub const CLAUSE_GAS_CONTRACT_CREATION: u64 = 53_000 - TX_GAS;
pub const TX_DATA_ZERO_GAS: u64 = 4;
pub const TX_DATA_NON_ZERO_GAS: u64 = 68;

pub const SLOAD_GAS: u64 = 200;
pub const SSTORE_SET_GAS: u64 = 20_000;
pub const SSTORE_RESET_GAS: u64 = 5_000;
/// Charged per byte of code stored by a creation clause.
pub const CREATE_DATA_GAS: u64 = 200;

// ============ GOVERNANCE KEYS ============

pub const KEY_EXECUTOR_ADDRESS: &[u8] = b"executor";
pub const KEY_BASE_GAS_PRICE: &[u8] = b"base-gas-price";
pub const KEY_PROPOSER_ENDORSEMENT: &[u8] = b"proposer-endorsement";

/// Storage slot of a governance key in the `Params` contract.
pub fn param_key(name: &[u8]) -> Bytes32 {
    Bytes32::left_padded(name)
}

pub const INITIAL_BASE_GAS_PRICE: u64 = 0;

/// 25 million tokens with 18 decimals.
pub fn initial_proposer_endorsement() -> U256 {
    U256::from(25_000_000u64) * U256::exp10(18)
}

// ============ CHAIN PARAMETERS ============

/// Chain-wide configuration. `Default` yields the protocol constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// Seconds between two consecutive block slots.
    pub block_interval: u64,
    /// Upper bound on authority candidates considered by the scheduler.
    pub max_block_proposers: u64,
    pub min_gas_limit: u64,
    pub initial_gas_limit: u64,
    pub gas_limit_bound_divisor: u64,
    /// Packing-time budget used to steer the target gas limit.
    pub tolerable_block_packing_time_ms: u64,
    pub tx_per_second_limit: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            block_interval: 5,
            max_block_proposers: 7,
            min_gas_limit: 1_000_000,
            initial_gas_limit: 2_000_000_000,
            gas_limit_bound_divisor: 1024,
            tolerable_block_packing_time_ms: 2_000,
            tx_per_second_limit: 2000,
        }
    }
}

impl ChainParams {
    pub fn tolerable_block_packing_time(&self) -> Duration {
        Duration::from_millis(self.tolerable_block_packing_time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_protocol_constants() {
        let p = ChainParams::default();
        assert_eq!(p.block_interval, 5);
        assert_eq!(p.max_block_proposers, 7);
        assert_eq!(p.min_gas_limit, 1_000_000);
        assert_eq!(p.gas_limit_bound_divisor, 1024);
        assert_eq!(p.tolerable_block_packing_time(), Duration::from_secs(2));
        assert_eq!(CLAUSE_GAS, 16_000);
        assert_eq!(CLAUSE_GAS_CONTRACT_CREATION, 48_000);
    }

    #[test]
    fn test_param_key_is_right_aligned() {
        let key = param_key(KEY_EXECUTOR_ADDRESS);
        assert_eq!(&key.0[32 - 8..], b"executor");
    }
}
