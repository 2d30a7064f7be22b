use lumen_core::params::{param_key, KEY_BASE_GAS_PRICE};
use lumen_core::Transaction;
use lumen_crypto::Address;
use lumen_state::State;
use primitive_types::U256;

use crate::builtin::Params;
use crate::context::TxContext;
use crate::error::RuntimeError;

/// A transaction whose signer and intrinsic gas have been checked.
#[derive(Debug)]
pub struct ResolvedTransaction<'t> {
    pub tx: &'t Transaction,
    pub origin: Address,
    pub intrinsic_gas: u64,
}

impl<'t> ResolvedTransaction<'t> {
    pub fn resolve(tx: &'t Transaction) -> Result<Self, RuntimeError> {
        let origin = tx.signer()?;
        let intrinsic_gas = tx.intrinsic_gas();
        if tx.gas() < intrinsic_gas {
            return Err(RuntimeError::IntrinsicGasExceeded { want: intrinsic_gas, have: tx.gas() });
        }

        let mut total = U256::zero();
        for clause in tx.clauses() {
            total = total.checked_add(clause.value).ok_or(RuntimeError::ValueOverflow)?;
        }

        Ok(Self { tx, origin, intrinsic_gas })
    }

    /// Charges `gas * base_gas_price` to the origin and returns the price.
    pub fn buy_gas(&self, state: &mut State) -> Result<U256, RuntimeError> {
        let gas_price = Params::new(&*state).get(&param_key(KEY_BASE_GAS_PRICE))?;
        let prepaid = U256::from(self.tx.gas()).saturating_mul(gas_price);
        let balance = state.get_balance(&self.origin)?;
        if balance < prepaid {
            return Err(RuntimeError::InsufficientGasFunds { origin: self.origin, required: prepaid });
        }
        state.set_balance(&self.origin, balance - prepaid)?;
        Ok(gas_price)
    }

    pub fn to_context(&self, gas_price: U256) -> Result<TxContext, RuntimeError> {
        Ok(TxContext {
            id: self.tx.id()?,
            origin: self.origin,
            gas_price,
            block_ref: self.tx.block_ref(),
            expiration: self.tx.expiration(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::{Clause, TxBuilder};
    use lumen_crypto::{address_of, generate_secret_key};
    use lumen_state::{MemKv, StateCreator, EMPTY_ROOT};
    use std::sync::Arc;

    #[test]
    fn test_resolve_checks_intrinsic_gas() {
        let key = generate_secret_key();
        let tx = TxBuilder::new().gas(1000).build().sign(&key);
        assert!(matches!(
            ResolvedTransaction::resolve(&tx),
            Err(RuntimeError::IntrinsicGasExceeded { want: 21_000, have: 1000 })
        ));

        let tx = TxBuilder::new().gas(21_000).build().sign(&key);
        let resolved = ResolvedTransaction::resolve(&tx).unwrap();
        assert_eq!(resolved.origin, address_of(&key));
    }

    #[test]
    fn test_resolve_rejects_value_overflow() {
        let to = Some(Address::left_padded(b"to"));
        let tx = TxBuilder::new()
            .clause(Clause::new(to).with_value(U256::MAX))
            .clause(Clause::new(to).with_value(U256::one()))
            .gas(100_000)
            .build()
            .sign(&generate_secret_key());
        assert!(matches!(ResolvedTransaction::resolve(&tx), Err(RuntimeError::ValueOverflow)));
    }

    #[test]
    fn test_buy_gas() {
        let key = generate_secret_key();
        let origin = address_of(&key);
        let mut state = StateCreator::new(Arc::new(MemKv::new())).new_state(EMPTY_ROOT).unwrap();
        Params::new(&mut state).set(param_key(KEY_BASE_GAS_PRICE), U256::from(10));

        let tx = TxBuilder::new().gas(21_000).build().sign(&key);
        let resolved = ResolvedTransaction::resolve(&tx).unwrap();
        assert!(matches!(resolved.buy_gas(&mut state), Err(RuntimeError::InsufficientGasFunds { .. })));

        state.set_balance(&origin, U256::from(300_000)).unwrap();
        assert_eq!(resolved.buy_gas(&mut state).unwrap(), U256::from(10));
        assert_eq!(state.get_balance(&origin).unwrap(), U256::from(90_000));
    }
}
