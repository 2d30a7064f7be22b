//! Genesis block construction for development networks and tests.

use lumen_core::params::{
    initial_proposer_endorsement, param_key, INITIAL_BASE_GAS_PRICE, KEY_BASE_GAS_PRICE, KEY_PROPOSER_ENDORSEMENT,
};
use lumen_core::{receipts_root, Block, BlockBuilder, ChainParams};
use lumen_crypto::{address_of, Address, Bytes32, SecretKey};
use lumen_state::{StateCreator, StateError, EMPTY_ROOT};
use lumen_vm::{Authority, Params};
use log::info;
use primitive_types::U256;

#[derive(Debug, Clone)]
struct GenesisAuthority {
    node_master: Address,
    endorsor: Address,
    identity: Bytes32,
}

/// Collects the initial state and writes it when the block is built.
#[derive(Debug, Clone)]
pub struct GenesisBuilder {
    timestamp: u64,
    gas_limit: u64,
    balances: Vec<(Address, U256)>,
    authorities: Vec<GenesisAuthority>,
    executor: Option<Address>,
    params: Vec<(Bytes32, U256)>,
}

impl Default for GenesisBuilder {
    fn default() -> Self {
        Self {
            timestamp: 0,
            gas_limit: ChainParams::default().initial_gas_limit,
            balances: Vec::new(),
            authorities: Vec::new(),
            executor: None,
            params: vec![
                (param_key(KEY_BASE_GAS_PRICE), U256::from(INITIAL_BASE_GAS_PRICE)),
                (param_key(KEY_PROPOSER_ENDORSEMENT), initial_proposer_endorsement()),
            ],
        }
    }
}

impl GenesisBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key becomes a self-endorsed authority funded with twice the
    /// endorsement threshold. The first key is the executor.
    pub fn devnet(keys: &[SecretKey], timestamp: u64) -> Self {
        let mut builder = Self::new().timestamp(timestamp);
        for key in keys {
            let addr = address_of(key);
            builder = builder
                .account(addr, initial_proposer_endorsement() * U256::from(2u8))
                .authority(addr, addr, Bytes32::ZERO);
        }
        if let Some(first) = keys.first() {
            builder = builder.executor(address_of(first));
        }
        builder
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn account(mut self, addr: Address, balance: U256) -> Self {
        self.balances.push((addr, balance));
        self
    }

    pub fn authority(mut self, node_master: Address, endorsor: Address, identity: Bytes32) -> Self {
        self.authorities.push(GenesisAuthority { node_master, endorsor, identity });
        self
    }

    pub fn executor(mut self, executor: Address) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Overrides a `Params` value; later calls win.
    pub fn param(mut self, key: Bytes32, value: U256) -> Self {
        self.params.push((key, value));
        self
    }

    /// Commits the genesis state through `creator` and returns the block.
    pub fn build(&self, creator: &StateCreator) -> Result<Block, StateError> {
        let mut state = creator.new_state(EMPTY_ROOT)?;
        for (addr, balance) in &self.balances {
            state.set_balance(addr, *balance)?;
        }

        let mut params = Params::new(&mut state);
        for (key, value) in &self.params {
            params.set(*key, *value);
        }
        if let Some(executor) = &self.executor {
            params.set_executor(executor);
        }

        let mut authority = Authority::new(&mut state);
        for a in &self.authorities {
            authority.add(&a.node_master, &a.endorsor, &a.identity)?;
        }

        let state_root = state.stage()?.commit()?;
        let block = BlockBuilder::new()
            .parent_id(Bytes32([0xff; 32]))
            .timestamp(self.timestamp)
            .gas_limit(self.gas_limit)
            .state_root(state_root)
            .receipts_root(receipts_root(&[]))
            .build();
        info!("built genesis {} with {} authorities", block.id(), self.authorities.len());
        Ok(block)
    }
}
