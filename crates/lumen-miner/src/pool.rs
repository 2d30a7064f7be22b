//! Pending transactions fed to the packing loop.

use std::collections::HashSet;

use log::{debug, warn};
use lumen_core::Transaction;
use lumen_crypto::Bytes32;
use parking_lot::Mutex;

/// Where the packing loop takes candidate transactions from.
pub trait TxSource: Send + Sync {
    /// Transactions to try, in adoption order.
    fn executables(&self) -> Vec<Transaction>;

    /// Drops a transaction that was packed or can never be packed.
    fn remove(&self, id: &Bytes32);
}

#[derive(Default)]
struct Inner {
    ids: HashSet<Bytes32>,
    txs: Vec<(Bytes32, Transaction)>,
}

/// Insertion-ordered, de-duplicated pool. No admission policy beyond a
/// recoverable signature.
#[derive(Default)]
pub struct MemPool {
    inner: Mutex<Inner>,
}

impl MemPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for duplicates and unsigned transactions.
    pub fn add(&self, tx: Transaction) -> bool {
        let id = match tx.id() {
            Ok(id) => id,
            Err(e) => {
                warn!("Rejecting transaction without valid signature: {}", e);
                return false;
            }
        };
        let mut inner = self.inner.lock();
        if !inner.ids.insert(id) {
            warn!("Attempting to add duplicate transaction: {}", id);
            return false;
        }
        inner.txs.push((id, tx));
        debug!("Transaction added to pool. Total: {}", inner.txs.len());
        true
    }

    pub fn contains(&self, id: &Bytes32) -> bool {
        self.inner.lock().ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TxSource for MemPool {
    fn executables(&self) -> Vec<Transaction> {
        self.inner.lock().txs.iter().map(|(_, tx)| tx.clone()).collect()
    }

    fn remove(&self, id: &Bytes32) {
        let mut inner = self.inner.lock();
        if inner.ids.remove(id) {
            inner.txs.retain(|(tx_id, _)| tx_id != id);
        }
    }
}
