//! Native contract methods and the environment they run in.
//!
//! Contracts implemented in Rust are registered into a [`NativeRegistry`]
//! once at start-up and the registry is shared by every [`Runtime`]. Call
//! data is a four byte selector (`blake2b(name)[..4]`) followed by the RLP
//! encoded argument list.
//!
//! [`Runtime`]: crate::Runtime

use std::collections::{HashMap, HashSet};

use lumen_core::{Event, Transfer};
use lumen_crypto::{blake2b256, Address, Bytes32};
use lumen_state::State;
use primitive_types::U256;
use rlp::{Rlp, RlpStream};
use tokio_util::sync::CancellationToken;

use crate::context::{BlockContext, TxContext};
use crate::error::{NativeError, VmError};

pub type Selector = [u8; 4];

pub type NativeFn = fn(&mut NativeEnv<'_>, &Rlp<'_>) -> Result<Vec<u8>, NativeError>;

pub fn selector(name: &str) -> Selector {
    let hash = blake2b256(name.as_bytes());
    [hash.0[0], hash.0[1], hash.0[2], hash.0[3]]
}

/// Call data for `name` with an already built argument list.
pub fn call_data(name: &str, args: RlpStream) -> Vec<u8> {
    let mut data = selector(name).to_vec();
    data.extend_from_slice(&args.out());
    data
}

#[derive(Clone, Copy)]
pub struct NativeMethod {
    pub name: &'static str,
    pub run: NativeFn,
}

/// Table of native methods keyed by contract address and selector.
#[derive(Default)]
pub struct NativeRegistry {
    methods: HashMap<(Address, Selector), NativeMethod>,
    contracts: HashSet<Address>,
}

impl NativeRegistry {
    /// An empty registry. Most callers want [`NativeRegistry::with_builtins`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `Authority` and `Params` contracts.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register(&mut registry);
        registry
    }

    pub fn register(&mut self, contract: Address, name: &'static str, run: NativeFn) -> &mut Self {
        self.methods.insert((contract, selector(name)), NativeMethod { name, run });
        self.contracts.insert(contract);
        self
    }

    pub fn is_native(&self, contract: &Address) -> bool {
        self.contracts.contains(contract)
    }

    /// Resolves call data to a method and its argument bytes.
    pub fn find<'d>(&self, contract: &Address, data: &'d [u8]) -> Option<(NativeMethod, &'d [u8])> {
        if data.len() < 4 {
            return None;
        }
        let sel = [data[0], data[1], data[2], data[3]];
        self.methods.get(&(*contract, sel)).map(|m| (*m, &data[4..]))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Execution environment of one clause.
///
/// Gas is charged through [`NativeEnv::use_gas`], which is also where the
/// interrupt token is observed.
pub struct NativeEnv<'a> {
    state: &'a mut State,
    block: &'a BlockContext,
    tx: &'a TxContext,
    contract: Address,
    gas: u64,
    refund: u64,
    events: Vec<Event>,
    transfers: Vec<Transfer>,
    interrupt: &'a CancellationToken,
}

impl<'a> NativeEnv<'a> {
    pub(crate) fn new(
        state: &'a mut State,
        block: &'a BlockContext,
        tx: &'a TxContext,
        gas: u64,
        interrupt: &'a CancellationToken,
    ) -> Self {
        Self {
            state,
            block,
            tx,
            contract: Address::ZERO,
            gas,
            refund: 0,
            events: Vec::new(),
            transfers: Vec::new(),
            interrupt,
        }
    }

    pub fn state(&self) -> &State {
        self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        self.state
    }

    pub fn block(&self) -> &BlockContext {
        self.block
    }

    pub fn tx(&self) -> &TxContext {
        self.tx
    }

    /// Account that signed the transaction.
    pub fn caller(&self) -> Address {
        self.tx.origin
    }

    /// Contract whose method is running.
    pub fn contract(&self) -> Address {
        self.contract
    }

    pub(crate) fn set_contract(&mut self, contract: Address) {
        self.contract = contract;
    }

    pub fn gas_left(&self) -> u64 {
        self.gas
    }

    pub fn use_gas(&mut self, gas: u64) -> Result<(), VmError> {
        if self.interrupt.is_cancelled() {
            return Err(VmError::Interrupted);
        }
        if gas > self.gas {
            self.gas = 0;
            return Err(VmError::OutOfGas);
        }
        self.gas -= gas;
        Ok(())
    }

    pub fn add_refund(&mut self, gas: u64) {
        self.refund = self.refund.saturating_add(gas);
    }

    pub fn emit(&mut self, topics: Vec<Bytes32>, data: Vec<u8>) {
        self.events.push(Event { address: self.contract, topics, data });
    }

    /// Moves `amount` between accounts and records the transfer.
    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), NativeError> {
        if amount.is_zero() {
            return Ok(());
        }
        let from_balance = self.state.get_balance(&from)?;
        if from_balance < amount {
            return Err(VmError::InsufficientBalance.into());
        }
        self.state.set_balance(&from, from_balance - amount)?;
        let to_balance = self.state.get_balance(&to)?;
        self.state.set_balance(&to, to_balance.saturating_add(amount))?;
        self.transfers.push(Transfer { sender: from, recipient: to, amount });
        Ok(())
    }

    pub(crate) fn finish(self) -> (Vec<Event>, Vec<Transfer>, u64, u64) {
        (self.events, self.transfers, self.gas, self.refund)
    }
}
