//! Transaction and clause execution.
//!
//! SAFETY INVARIANTS:
//! 1. Every clause runs under its own state checkpoint; a clause that fails
//!    leaves no state behind.
//! 2. A transaction takes one checkpoint after gas is bought; the first
//!    failing clause reverts the whole transaction to it and the receipt is
//!    marked reverted. The gas purchase itself is never reverted.
//! 3. Interruption is observed at gas charging points only, so a clause
//!    stops at a well-defined step and is then reverted like any failure.

use std::sync::Arc;

use lumen_core::params::CREATE_DATA_GAS;
use lumen_core::{Clause, ClauseOutput, Event, Receipt, Transaction, Transfer};
use lumen_crypto::{blake2b256_concat, Address, Bytes32};
use lumen_state::State;
use primitive_types::U256;
use rlp::Rlp;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::context::{BlockContext, TxContext};
use crate::error::{NativeError, RuntimeError, VmError};
use crate::native::{NativeEnv, NativeRegistry};
use crate::resolved::ResolvedTransaction;

/// Address of a contract created by clause `clause_index` of `tx_id`.
pub fn contract_address(tx_id: &Bytes32, clause_index: u32, counter: u32) -> Address {
    let hash = blake2b256_concat(&[
        tx_id.as_bytes(),
        &clause_index.to_be_bytes(),
        &counter.to_be_bytes(),
    ]);
    let mut out = [0u8; Address::LEN];
    out.copy_from_slice(&hash.0[12..]);
    Address(out)
}

/// Result of one clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub data: Vec<u8>,
    pub events: Vec<Event>,
    pub transfers: Vec<Transfer>,
    pub left_over_gas: u64,
    pub refund_gas: u64,
    pub vm_err: Option<VmError>,
    pub contract_address: Option<Address>,
}

/// Stops a running clause at its next gas charge.
#[derive(Debug, Clone, Default)]
pub struct ClauseInterrupter {
    token: CancellationToken,
}

impl ClauseInterrupter {
    pub fn interrupt(&self) {
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A clause ready to run against its runtime.
pub struct PreparedClause<'r> {
    runtime: &'r mut Runtime,
    clause: Clause,
    index: u32,
    gas: u64,
    tx_ctx: TxContext,
    token: CancellationToken,
}

impl PreparedClause<'_> {
    /// Runs the clause. The flag reports whether it was interrupted.
    pub fn exec(self) -> Result<(Output, bool), RuntimeError> {
        let PreparedClause { runtime, clause, index, gas, tx_ctx, token } = self;
        runtime.run_clause(&clause, index, gas, &tx_ctx, &token)
    }
}

pub struct Runtime {
    state: State,
    ctx: BlockContext,
    registry: Arc<NativeRegistry>,
}

impl Runtime {
    pub fn new(state: State, ctx: BlockContext, registry: Arc<NativeRegistry>) -> Self {
        Self { state, ctx, registry }
    }

    pub fn context(&self) -> &BlockContext {
        &self.ctx
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    // === CLAUSES ===

    pub fn prepare_clause(
        &mut self,
        clause: &Clause,
        index: u32,
        gas: u64,
        tx_ctx: &TxContext,
    ) -> (PreparedClause<'_>, ClauseInterrupter) {
        let interrupter = ClauseInterrupter::default();
        let prepared = PreparedClause {
            runtime: self,
            clause: clause.clone(),
            index,
            gas,
            tx_ctx: tx_ctx.clone(),
            token: interrupter.token.clone(),
        };
        (prepared, interrupter)
    }

    pub fn execute_clause(
        &mut self,
        clause: &Clause,
        index: u32,
        gas: u64,
        tx_ctx: &TxContext,
    ) -> Result<Output, RuntimeError> {
        let (output, _) = self.run_clause(clause, index, gas, tx_ctx, &CancellationToken::new())?;
        Ok(output)
    }

    /// Runs a clause on the blocking pool, interrupting it if `cancel` fires
    /// first. The runtime is handed back together with the output.
    pub async fn execute_clause_cancellable(
        mut self,
        clause: Clause,
        index: u32,
        gas: u64,
        tx_ctx: TxContext,
        cancel: CancellationToken,
    ) -> Result<(Runtime, Output, bool), RuntimeError> {
        let interrupter = ClauseInterrupter::default();
        let token = interrupter.token.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            let result = self.run_clause(&clause, index, gas, &tx_ctx, &token);
            (self, result)
        });

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = cancel.cancelled() => {
                interrupter.interrupt();
                task.await
            }
        };
        let (runtime, result) = joined.map_err(|e| RuntimeError::Task(e.to_string()))?;
        let (output, interrupted) = result?;
        if interrupted {
            metrics::increment_counter!("lumen_vm_clauses_interrupted");
        }
        Ok((runtime, output, interrupted))
    }

    fn run_clause(
        &mut self,
        clause: &Clause,
        index: u32,
        gas: u64,
        tx_ctx: &TxContext,
        token: &CancellationToken,
    ) -> Result<(Output, bool), RuntimeError> {
        let checkpoint = self.state.new_checkpoint();
        let mut env = NativeEnv::new(&mut self.state, &self.ctx, tx_ctx, gas, token);
        let result = match clause.to {
            None => create_contract(&mut env, clause, index),
            Some(to) => call(&mut env, &self.registry, to, clause),
        };
        let (events, transfers, left_over_gas, refund_gas) = env.finish();
        let interrupted = token.is_cancelled();

        let output = match result {
            Ok((data, contract_address)) => Output {
                data,
                events,
                transfers,
                left_over_gas,
                refund_gas,
                vm_err: None,
                contract_address,
            },
            Err(NativeError::Vm(err)) => {
                self.state.revert_to(checkpoint)?;
                debug!(clause = index, error = %err, "clause failed");
                let left_over_gas = match err {
                    VmError::OutOfGas | VmError::Interrupted => 0,
                    _ => left_over_gas,
                };
                Output { left_over_gas, vm_err: Some(err), ..Output::default() }
            }
            Err(NativeError::State(err)) => return Err(err.into()),
        };
        Ok((output, interrupted))
    }

    // === TRANSACTIONS ===

    /// Buys gas for `tx` and returns an executor stepping through its clauses.
    pub fn prepare_transaction(&mut self, tx: &Transaction) -> Result<TransactionExecutor<'_>, RuntimeError> {
        let resolved = ResolvedTransaction::resolve(tx)?;
        let gas_price = resolved.buy_gas(&mut self.state)?;
        let tx_ctx = resolved.to_context(gas_price)?;
        let checkpoint = self.state.new_checkpoint();

        Ok(TransactionExecutor {
            runtime: self,
            tx_ctx,
            clauses: tx.clauses().to_vec(),
            next: 0,
            gas: tx.gas(),
            left_over_gas: tx.gas() - resolved.intrinsic_gas,
            checkpoint,
            reverted: false,
            outputs: Vec::new(),
        })
    }

    pub fn execute_transaction(&mut self, tx: &Transaction) -> Result<Receipt, RuntimeError> {
        let mut executor = self.prepare_transaction(tx)?;
        while executor.has_next_clause() {
            executor.next_clause()?;
        }
        executor.finalize()
    }
}

fn call(
    env: &mut NativeEnv<'_>,
    registry: &NativeRegistry,
    to: Address,
    clause: &Clause,
) -> Result<(Vec<u8>, Option<Address>), NativeError> {
    let caller = env.caller();
    if clause.data.is_empty() || !registry.is_native(&to) {
        env.transfer(caller, to, clause.value)?;
        return Ok((Vec::new(), None));
    }

    let (method, args) = registry.find(&to, &clause.data).ok_or(VmError::UnknownMethod)?;
    if !clause.value.is_zero() {
        return Err(VmError::Reverted(format!("{} does not accept value", method.name)).into());
    }
    trace!(contract = %to, method = method.name, "native call");
    env.set_contract(to);
    let data = (method.run)(env, &Rlp::new(args))?;
    Ok((data, None))
}

fn create_contract(
    env: &mut NativeEnv<'_>,
    clause: &Clause,
    index: u32,
) -> Result<(Vec<u8>, Option<Address>), NativeError> {
    let origin = env.caller();
    let addr = contract_address(&env.tx().id, index, 0);
    if !env.state().get_code_hash(&addr)?.is_zero() || !env.state().get_master(&addr)?.is_zero() {
        return Err(VmError::ContractAddressCollision(addr).into());
    }

    env.use_gas(CREATE_DATA_GAS.saturating_mul(clause.data.len() as u64))?;
    env.set_contract(addr);
    env.state_mut().set_code(&addr, clause.data.clone())?;
    env.state_mut().set_master(&addr, origin)?;
    env.transfer(origin, addr, clause.value)?;
    Ok((Vec::new(), Some(addr)))
}

/// Steps through the clauses of one transaction.
pub struct TransactionExecutor<'r> {
    runtime: &'r mut Runtime,
    tx_ctx: TxContext,
    clauses: Vec<Clause>,
    next: usize,
    gas: u64,
    left_over_gas: u64,
    checkpoint: usize,
    reverted: bool,
    outputs: Vec<ClauseOutput>,
}

impl TransactionExecutor<'_> {
    pub fn context(&self) -> &TxContext {
        &self.tx_ctx
    }

    pub fn has_next_clause(&self) -> bool {
        !self.reverted && self.next < self.clauses.len()
    }

    /// Executes the next clause and returns the gas it used.
    pub fn next_clause(&mut self) -> Result<(u64, Output), RuntimeError> {
        if !self.has_next_clause() {
            return Err(RuntimeError::NoMoreClauses);
        }
        let index = self.next;
        self.next += 1;

        let output = self.runtime.execute_clause(&self.clauses[index], index as u32, self.left_over_gas, &self.tx_ctx)?;
        let gas_used = self.left_over_gas.saturating_sub(output.left_over_gas);
        self.left_over_gas = output.left_over_gas;
        // refunds are capped at half of what the clause burned
        self.left_over_gas += (gas_used / 2).min(output.refund_gas);

        if output.vm_err.is_some() {
            self.runtime.state.revert_to(self.checkpoint)?;
            self.reverted = true;
            self.outputs.clear();
        } else {
            self.outputs.push(ClauseOutput {
                events: output.events.clone(),
                transfers: output.transfers.clone(),
            });
        }
        Ok((gas_used, output))
    }

    /// Returns unused gas to the origin, rewards the beneficiary and builds
    /// the receipt.
    pub fn finalize(mut self) -> Result<Receipt, RuntimeError> {
        if self.has_next_clause() {
            return Err(RuntimeError::Unfinished);
        }
        let gas_used = self.gas - self.left_over_gas;
        let price = self.tx_ctx.gas_price;
        let origin = self.tx_ctx.origin;
        let beneficiary = self.runtime.ctx.beneficiary;
        let state = &mut self.runtime.state;

        let returned = U256::from(self.left_over_gas).saturating_mul(price);
        let balance = state.get_balance(&origin)?;
        state.set_balance(&origin, balance.saturating_add(returned))?;

        let reward = U256::from(gas_used).saturating_mul(price);
        let balance = state.get_balance(&beneficiary)?;
        state.set_balance(&beneficiary, balance.saturating_add(reward))?;

        debug!(tx = %self.tx_ctx.id, gas_used, reverted = self.reverted, "executed transaction");
        metrics::increment_counter!("lumen_vm_transactions_executed");
        metrics::counter!("lumen_vm_gas_used", gas_used);
        if self.reverted {
            metrics::increment_counter!("lumen_vm_transactions_reverted");
        }

        Ok(Receipt {
            gas_used,
            gas_payer: origin,
            paid: reward,
            reward,
            reverted: self.reverted,
            outputs: self.outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{authority, params, Authority, Params};
    use lumen_core::params::{param_key, KEY_BASE_GAS_PRICE};
    use lumen_core::TxBuilder;
    use lumen_crypto::{address_of, generate_secret_key, SecretKey};
    use lumen_state::{MemKv, StateCreator, EMPTY_ROOT};

    struct Fixture {
        runtime: Runtime,
        executor: SecretKey,
        beneficiary: Address,
    }

    fn fixture(gas_price: u64) -> Fixture {
        let executor = generate_secret_key();
        let mut state = StateCreator::new(Arc::new(MemKv::new())).new_state(EMPTY_ROOT).unwrap();
        state.set_balance(&address_of(&executor), U256::from(10_000_000_000u64)).unwrap();
        Params::new(&mut state).set_executor(&address_of(&executor));
        Params::new(&mut state).set(param_key(KEY_BASE_GAS_PRICE), U256::from(gas_price));

        let beneficiary = Address::left_padded(b"beneficiary");
        let ctx = BlockContext {
            beneficiary,
            signer: Address::ZERO,
            number: 1,
            time: 1000,
            gas_limit: 10_000_000,
            total_score: 1,
        };
        let runtime = Runtime::new(state, ctx, Arc::new(NativeRegistry::with_builtins()));
        Fixture { runtime, executor, beneficiary }
    }

    #[test]
    fn test_transfer_pays_gas_and_rewards_beneficiary() {
        let mut f = fixture(2);
        let origin = address_of(&f.executor);
        let to = Address::left_padded(b"bob");
        let tx = TxBuilder::new()
            .clause(Clause::new(Some(to)).with_value(U256::from(1000)))
            .gas(50_000)
            .build()
            .sign(&f.executor);

        let receipt = f.runtime.execute_transaction(&tx).unwrap();
        assert!(!receipt.reverted);
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.gas_payer, origin);
        assert_eq!(receipt.paid, U256::from(42_000));
        assert_eq!(receipt.outputs.len(), 1);
        assert_eq!(receipt.outputs[0].transfers, vec![Transfer { sender: origin, recipient: to, amount: U256::from(1000) }]);

        let state = f.runtime.state();
        assert_eq!(state.get_balance(&to).unwrap(), U256::from(1000));
        assert_eq!(state.get_balance(&f.beneficiary).unwrap(), U256::from(42_000));
        assert_eq!(state.get_balance(&origin).unwrap(), U256::from(10_000_000_000u64 - 1000 - 42_000));
    }

    #[test]
    fn test_failed_clause_reverts_whole_transaction() {
        let mut f = fixture(0);
        let a = Address::left_padded(b"a");
        let tx = TxBuilder::new()
            .clause(Clause::new(Some(a)).with_value(U256::from(5)))
            .clause(Clause::new(Some(a)).with_value(U256::from(10_000_000_001u64)))
            .clause(Clause::new(Some(a)).with_value(U256::from(7)))
            .gas(100_000)
            .build()
            .sign(&f.executor);
        let receipt = f.runtime.execute_transaction(&tx).unwrap();
        assert!(receipt.reverted);
        assert!(receipt.outputs.is_empty());
        assert_eq!(f.runtime.state().get_balance(&a).unwrap(), U256::zero());
    }

    #[test]
    fn test_executor_adds_candidate_through_clause() {
        let mut f = fixture(0);
        let node = Address::left_padded(b"node");
        let tx = TxBuilder::new()
            .clause(authority::add_clause(&node, &node, &Bytes32::ZERO))
            .gas(200_000)
            .build()
            .sign(&f.executor);

        let receipt = f.runtime.execute_transaction(&tx).unwrap();
        assert!(!receipt.reverted);
        assert_eq!(receipt.outputs[0].events.len(), 1);
        assert_eq!(receipt.outputs[0].events[0].address, authority::address());
        assert!(Authority::new(f.runtime.state()).get(&node).unwrap().0);
    }

    #[test]
    fn test_non_executor_is_unauthorized() {
        let mut f = fixture(0);
        let stranger = generate_secret_key();
        f.runtime.state_mut().set_balance(&address_of(&stranger), U256::from(1)).unwrap();

        let tx = TxBuilder::new()
            .clause(params::set_clause(param_key(KEY_BASE_GAS_PRICE), U256::from(99)))
            .gas(200_000)
            .build()
            .sign(&stranger);
        let mut executor = f.runtime.prepare_transaction(&tx).unwrap();
        let (_, output) = executor.next_clause().unwrap();
        assert_eq!(output.vm_err, Some(VmError::Unauthorized(address_of(&stranger))));
        let receipt = executor.finalize().unwrap();
        assert!(receipt.reverted);
        assert_eq!(Params::new(f.runtime.state()).get(&param_key(KEY_BASE_GAS_PRICE)).unwrap(), U256::zero());
    }

    #[test]
    fn test_unknown_native_method() {
        let mut f = fixture(0);
        let tx_ctx = TxContext {
            id: Bytes32::ZERO,
            origin: address_of(&f.executor),
            gas_price: U256::zero(),
            block_ref: lumen_core::BlockRef::default(),
            expiration: 0,
        };
        let clause = Clause::new(Some(authority::address())).with_data(vec![0xde, 0xad, 0xbe, 0xef]);
        let output = f.runtime.execute_clause(&clause, 0, 100_000, &tx_ctx).unwrap();
        assert_eq!(output.vm_err, Some(VmError::UnknownMethod));
        assert_eq!(output.left_over_gas, 100_000);
    }

    #[test]
    fn test_out_of_gas_consumes_everything() {
        let mut f = fixture(0);
        let node = Address::left_padded(b"node");
        let tx_ctx = TxContext {
            id: Bytes32::ZERO,
            origin: address_of(&f.executor),
            gas_price: U256::zero(),
            block_ref: lumen_core::BlockRef::default(),
            expiration: 0,
        };
        let clause = authority::add_clause(&node, &node, &Bytes32::ZERO);
        let output = f.runtime.execute_clause(&clause, 0, 1_000, &tx_ctx).unwrap();
        assert_eq!(output.vm_err, Some(VmError::OutOfGas));
        assert_eq!(output.left_over_gas, 0);
        assert!(!Authority::new(f.runtime.state()).get(&node).unwrap().0);
    }

    #[test]
    fn test_contract_creation() {
        let mut f = fixture(0);
        let code = vec![0x60, 0x00, 0x60, 0x00];
        let tx = TxBuilder::new()
            .clause(Clause::new(None).with_data(code.clone()))
            .gas(100_000)
            .build()
            .sign(&f.executor);
        let tx_id = tx.id().unwrap();

        let receipt = f.runtime.execute_transaction(&tx).unwrap();
        assert!(!receipt.reverted);
        assert!(receipt.gas_used >= tx.intrinsic_gas() + CREATE_DATA_GAS * code.len() as u64);

        let addr = contract_address(&tx_id, 0, 0);
        assert_eq!(f.runtime.state().get_code(&addr).unwrap(), code);
        assert_eq!(f.runtime.state().get_master(&addr).unwrap(), address_of(&f.executor));
    }
}
