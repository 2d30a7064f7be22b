//! `Params`: governance-controlled protocol values.
//!
//! Each value is a `U256` stored RLP encoded under `left_padded(name)` in
//! the contract's storage; zero is stored as an empty value.

use std::ops::{Deref, DerefMut};

use lumen_core::params::{param_key, KEY_EXECUTOR_ADDRESS, SLOAD_GAS, SSTORE_SET_GAS};
use lumen_core::Clause;
use lumen_crypto::{Address, Bytes32};
use lumen_state::{State, StateError};
use primitive_types::U256;
use rlp::{Rlp, RlpStream};

use super::{event_topic, require_executor};
use crate::error::NativeError;
use crate::native::{call_data, NativeEnv, NativeRegistry};

pub fn address() -> Address {
    Address::left_padded(b"Params")
}

pub(crate) fn address_to_u256(addr: &Address) -> U256 {
    U256::from_big_endian(addr.as_bytes())
}

pub(crate) fn u256_to_address(value: U256) -> Address {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    let mut out = [0u8; Address::LEN];
    out.copy_from_slice(&word[32 - Address::LEN..]);
    Address(out)
}

/// Binds the `Params` contract to a state. Reads need any `Deref` to
/// [`State`], writes need a mutable one.
pub struct Params<S> {
    state: S,
}

impl<S: Deref<Target = State>> Params<S> {
    pub fn new(state: S) -> Self {
        Self { state }
    }

    pub fn get(&self, key: &Bytes32) -> Result<U256, StateError> {
        let raw = self.state.get_raw_storage(&address(), key)?;
        if raw.is_empty() {
            return Ok(U256::zero());
        }
        Ok(rlp::decode(&raw)?)
    }

    pub fn executor(&self) -> Result<Address, StateError> {
        Ok(u256_to_address(self.get(&param_key(KEY_EXECUTOR_ADDRESS))?))
    }
}

impl<S: DerefMut<Target = State>> Params<S> {
    pub fn set(&mut self, key: Bytes32, value: U256) {
        let raw = if value.is_zero() { Vec::new() } else { rlp::encode(&value).to_vec() };
        self.state.set_raw_storage(&address(), key, raw);
    }

    pub fn set_executor(&mut self, executor: &Address) {
        self.set(param_key(KEY_EXECUTOR_ADDRESS), address_to_u256(executor));
    }
}

/// Clause calling `set(key, value)`; only the executor may send it.
pub fn set_clause(key: Bytes32, value: U256) -> Clause {
    let mut args = RlpStream::new_list(2);
    args.append(&key);
    args.append(&value);
    Clause::new(Some(address())).with_data(call_data("set", args))
}

pub fn get_clause(key: Bytes32) -> Clause {
    let mut args = RlpStream::new_list(1);
    args.append(&key);
    Clause::new(Some(address())).with_data(call_data("get", args))
}

// ============ Native methods ============

pub(crate) fn register(registry: &mut NativeRegistry) {
    registry
        .register(address(), "executor", native_executor)
        .register(address(), "get", native_get)
        .register(address(), "set", native_set);
}

fn native_executor(env: &mut NativeEnv<'_>, _args: &Rlp<'_>) -> Result<Vec<u8>, NativeError> {
    env.use_gas(SLOAD_GAS)?;
    let executor = Params::new(env.state()).executor()?;
    Ok(rlp::encode(&executor).to_vec())
}

fn native_get(env: &mut NativeEnv<'_>, args: &Rlp<'_>) -> Result<Vec<u8>, NativeError> {
    let key: Bytes32 = args.val_at(0)?;
    env.use_gas(SLOAD_GAS)?;
    let value = Params::new(env.state()).get(&key)?;
    Ok(rlp::encode(&value).to_vec())
}

fn native_set(env: &mut NativeEnv<'_>, args: &Rlp<'_>) -> Result<Vec<u8>, NativeError> {
    let key: Bytes32 = args.val_at(0)?;
    let value: U256 = args.val_at(1)?;
    require_executor(env)?;
    env.use_gas(SSTORE_SET_GAS)?;
    Params::new(env.state_mut()).set(key, value);
    env.emit(vec![event_topic("Set(bytes32,uint256)"), key], rlp::encode(&value).to_vec());
    Ok(Vec::new())
}
