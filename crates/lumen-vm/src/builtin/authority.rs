//! `Authority`: the on-chain list of block proposer candidates.
//!
//! Candidates form a doubly linked list in contract storage:
//!
//! - `head` / `tail` slots hold the RLP address of the first/last node
//! - each node master has an entry at `blake2b(node_master)` holding
//!   `[endorsor, identity, active, prev, next]`
//!
//! A revoked candidate is unlinked and deactivated but keeps its endorsor
//! and identity, so `get` still reports who endorsed it.

use std::ops::{Deref, DerefMut};

use lumen_core::params::{param_key, KEY_PROPOSER_ENDORSEMENT, SLOAD_GAS, SSTORE_RESET_GAS, SSTORE_SET_GAS};
use lumen_core::Clause;
use lumen_crypto::{blake2b256, Address, Bytes32};
use lumen_state::{State, StateError};
use primitive_types::U256;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use super::{event_topic, require_executor, Params};
use crate::error::NativeError;
use crate::native::{call_data, NativeEnv, NativeRegistry};

/// Gas charged for reading an endorsor balance in `isEndorsed`.
const GET_BALANCE_GAS: u64 = 400;

pub fn address() -> Address {
    Address::left_padded(b"Authority")
}

fn head_key() -> Bytes32 {
    Bytes32::left_padded(b"head")
}

fn tail_key() -> Bytes32 {
    Bytes32::left_padded(b"tail")
}

fn entry_key(node_master: &Address) -> Bytes32 {
    blake2b256(node_master.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub node_master: Address,
    pub endorsor: Address,
    pub identity: Bytes32,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Entry {
    endorsor: Address,
    identity: Bytes32,
    active: bool,
    prev: Option<Address>,
    next: Option<Address>,
}

impl Entry {
    fn is_empty(&self) -> bool {
        self == &Entry::default()
    }

    fn is_linked(&self) -> bool {
        self.prev.is_some() || self.next.is_some()
    }
}

fn append_pointer(s: &mut RlpStream, ptr: &Option<Address>) {
    match ptr {
        Some(addr) => s.append(addr),
        None => s.append_empty_data(),
    };
}

fn decode_pointer(rlp: &Rlp, index: usize) -> Result<Option<Address>, DecoderError> {
    let item = rlp.at(index)?;
    if item.is_empty() {
        return Ok(None);
    }
    item.as_val().map(Some)
}

impl Encodable for Entry {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.endorsor);
        s.append(&self.identity);
        s.append(&u8::from(self.active));
        append_pointer(s, &self.prev);
        append_pointer(s, &self.next);
    }
}

impl Decodable for Entry {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 5 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            endorsor: rlp.val_at(0)?,
            identity: rlp.val_at(1)?,
            active: rlp.val_at::<u8>(2)? != 0,
            prev: decode_pointer(rlp, 3)?,
            next: decode_pointer(rlp, 4)?,
        })
    }
}

/// Binds the `Authority` contract to a state.
pub struct Authority<S> {
    state: S,
}

impl<S: Deref<Target = State>> Authority<S> {
    pub fn new(state: S) -> Self {
        Self { state }
    }

    fn entry(&self, node_master: &Address) -> Result<Entry, StateError> {
        let raw = self.state.get_raw_storage(&address(), &entry_key(node_master))?;
        if raw.is_empty() {
            return Ok(Entry::default());
        }
        Ok(rlp::decode(&raw)?)
    }

    fn pointer(&self, key: &Bytes32) -> Result<Option<Address>, StateError> {
        let raw = self.state.get_raw_storage(&address(), key)?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(rlp::decode(&raw)?))
    }

    fn is_listed(&self, node_master: &Address, entry: &Entry) -> Result<bool, StateError> {
        Ok(entry.is_linked() || self.pointer(&head_key())?.as_ref() == Some(node_master))
    }

    /// Returns `(listed, endorsor, identity, active)`.
    pub fn get(&self, node_master: &Address) -> Result<(bool, Address, Bytes32, bool), StateError> {
        let entry = self.entry(node_master)?;
        let listed = self.is_listed(node_master, &entry)?;
        Ok((listed, entry.endorsor, entry.identity, entry.active))
    }

    pub fn first(&self) -> Result<Option<Address>, StateError> {
        self.pointer(&head_key())
    }

    pub fn next(&self, node_master: &Address) -> Result<Option<Address>, StateError> {
        Ok(self.entry(node_master)?.next)
    }

    /// Candidates in listing order whose endorsor holds at least
    /// `threshold`, at most `max` of them.
    pub fn candidates(&self, threshold: U256, max: usize) -> Result<Vec<Candidate>, StateError> {
        let mut out = Vec::new();
        let mut cursor = self.first()?;
        while let Some(node_master) = cursor {
            if out.len() >= max {
                break;
            }
            let entry = self.entry(&node_master)?;
            if self.state.get_balance(&entry.endorsor)? >= threshold {
                out.push(Candidate {
                    node_master,
                    endorsor: entry.endorsor,
                    identity: entry.identity,
                    active: entry.active,
                });
            }
            cursor = entry.next;
        }
        Ok(out)
    }
}

impl<S: DerefMut<Target = State>> Authority<S> {
    fn set_entry(&mut self, node_master: &Address, entry: &Entry) {
        let raw = if entry.is_empty() { Vec::new() } else { rlp::encode(entry).to_vec() };
        self.state.set_raw_storage(&address(), entry_key(node_master), raw);
    }

    fn set_pointer(&mut self, key: Bytes32, ptr: Option<Address>) {
        let raw = ptr.map(|addr| rlp::encode(&addr).to_vec()).unwrap_or_default();
        self.state.set_raw_storage(&address(), key, raw);
    }

    /// Appends an active candidate. Returns false if it is already listed.
    pub fn add(&mut self, node_master: &Address, endorsor: &Address, identity: &Bytes32) -> Result<bool, StateError> {
        let entry = self.entry(node_master)?;
        if self.is_listed(node_master, &entry)? {
            return Ok(false);
        }

        let tail = self.pointer(&tail_key())?;
        let entry = Entry {
            endorsor: *endorsor,
            identity: *identity,
            active: true,
            prev: tail,
            next: None,
        };
        match tail {
            Some(tail) => {
                let mut tail_entry = self.entry(&tail)?;
                tail_entry.next = Some(*node_master);
                self.set_entry(&tail, &tail_entry);
            }
            None => self.set_pointer(head_key(), Some(*node_master)),
        }
        self.set_pointer(tail_key(), Some(*node_master));
        self.set_entry(node_master, &entry);
        Ok(true)
    }

    /// Unlinks a candidate. Returns false if it is not listed.
    pub fn revoke(&mut self, node_master: &Address) -> Result<bool, StateError> {
        let mut entry = self.entry(node_master)?;
        if !self.is_listed(node_master, &entry)? {
            return Ok(false);
        }

        match entry.prev {
            Some(prev) => {
                let mut prev_entry = self.entry(&prev)?;
                prev_entry.next = entry.next;
                self.set_entry(&prev, &prev_entry);
            }
            None => self.set_pointer(head_key(), entry.next),
        }
        match entry.next {
            Some(next) => {
                let mut next_entry = self.entry(&next)?;
                next_entry.prev = entry.prev;
                self.set_entry(&next, &next_entry);
            }
            None => self.set_pointer(tail_key(), entry.prev),
        }

        entry.prev = None;
        entry.next = None;
        entry.active = false;
        self.set_entry(node_master, &entry);
        Ok(true)
    }

    /// Sets the active flag of a listed candidate. Returns false if it is
    /// not listed.
    pub fn update(&mut self, node_master: &Address, active: bool) -> Result<bool, StateError> {
        let mut entry = self.entry(node_master)?;
        if !self.is_listed(node_master, &entry)? {
            return Ok(false);
        }
        entry.active = active;
        self.set_entry(node_master, &entry);
        Ok(true)
    }
}

pub fn add_clause(node_master: &Address, endorsor: &Address, identity: &Bytes32) -> Clause {
    let mut args = RlpStream::new_list(3);
    args.append(node_master);
    args.append(endorsor);
    args.append(identity);
    Clause::new(Some(address())).with_data(call_data("add", args))
}

pub fn revoke_clause(node_master: &Address) -> Clause {
    let mut args = RlpStream::new_list(1);
    args.append(node_master);
    Clause::new(Some(address())).with_data(call_data("revoke", args))
}

// ============ Native methods ============

pub(crate) fn register(registry: &mut NativeRegistry) {
    registry
        .register(address(), "add", native_add)
        .register(address(), "revoke", native_revoke)
        .register(address(), "get", native_get)
        .register(address(), "first", native_first)
        .register(address(), "next", native_next)
        .register(address(), "isEndorsed", native_is_endorsed);
}

fn candidate_event(env: &mut NativeEnv<'_>, node_master: &Address, action: &str) {
    env.emit(
        vec![event_topic("Candidate(address,bytes32)"), Bytes32::left_padded(node_master.as_bytes())],
        Bytes32::left_padded(action.as_bytes()).as_bytes().to_vec(),
    );
}

fn encode_pointer(ptr: Option<Address>) -> Vec<u8> {
    rlp::encode(&ptr.unwrap_or(Address::ZERO)).to_vec()
}

fn native_add(env: &mut NativeEnv<'_>, args: &Rlp<'_>) -> Result<Vec<u8>, NativeError> {
    let node_master: Address = args.val_at(0)?;
    let endorsor: Address = args.val_at(1)?;
    let identity: Bytes32 = args.val_at(2)?;
    require_executor(env)?;

    env.use_gas(SLOAD_GAS)?;
    let added = Authority::new(env.state_mut()).add(&node_master, &endorsor, &identity)?;
    if added {
        env.use_gas(SSTORE_SET_GAS + SSTORE_RESET_GAS)?;
        candidate_event(env, &node_master, "added");
    }
    Ok(rlp::encode(&u8::from(added)).to_vec())
}

fn native_revoke(env: &mut NativeEnv<'_>, args: &Rlp<'_>) -> Result<Vec<u8>, NativeError> {
    let node_master: Address = args.val_at(0)?;
    require_executor(env)?;

    env.use_gas(SLOAD_GAS)?;
    let revoked = Authority::new(env.state_mut()).revoke(&node_master)?;
    if revoked {
        env.use_gas(SSTORE_RESET_GAS * 3)?;
        candidate_event(env, &node_master, "revoked");
    }
    Ok(rlp::encode(&u8::from(revoked)).to_vec())
}

fn native_get(env: &mut NativeEnv<'_>, args: &Rlp<'_>) -> Result<Vec<u8>, NativeError> {
    let node_master: Address = args.val_at(0)?;
    env.use_gas(SLOAD_GAS * 2)?;
    let (listed, endorsor, identity, active) = Authority::new(env.state()).get(&node_master)?;

    let mut out = RlpStream::new_list(4);
    out.append(&u8::from(listed));
    out.append(&endorsor);
    out.append(&identity);
    out.append(&u8::from(active));
    Ok(out.out().to_vec())
}

fn native_first(env: &mut NativeEnv<'_>, _args: &Rlp<'_>) -> Result<Vec<u8>, NativeError> {
    env.use_gas(SLOAD_GAS)?;
    let first = Authority::new(env.state()).first()?;
    Ok(encode_pointer(first))
}

fn native_next(env: &mut NativeEnv<'_>, args: &Rlp<'_>) -> Result<Vec<u8>, NativeError> {
    let node_master: Address = args.val_at(0)?;
    env.use_gas(SLOAD_GAS)?;
    let next = Authority::new(env.state()).next(&node_master)?;
    Ok(encode_pointer(next))
}

/// Whether a listed candidate's endorsor still holds the endorsement
/// threshold.
fn native_is_endorsed(env: &mut NativeEnv<'_>, args: &Rlp<'_>) -> Result<Vec<u8>, NativeError> {
    let node_master: Address = args.val_at(0)?;
    env.use_gas(SLOAD_GAS * 2)?;
    let (listed, endorsor, _, _) = Authority::new(env.state()).get(&node_master)?;
    if !listed {
        return Ok(rlp::encode(&0u8).to_vec());
    }

    env.use_gas(GET_BALANCE_GAS + SLOAD_GAS)?;
    let threshold = Params::new(env.state()).get(&param_key(KEY_PROPOSER_ENDORSEMENT))?;
    let endorsed = env.state().get_balance(&endorsor)? >= threshold;
    Ok(rlp::encode(&u8::from(endorsed)).to_vec())
}
