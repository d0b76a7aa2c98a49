//! Pending-transaction pool feeding block production.
//!
//! Minimal admission policy: the signature must verify, the pool is
//! bounded, and a transaction is admitted at most once (keyed by its
//! canonical hash). Drain order is arrival order.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::types::transaction::TransactionError;
use crate::types::{Hash, Hasher, Transaction, TxHasher};

pub const DEFAULT_MEMPOOL_CAPACITY: usize = 10_000;

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction {0} already pending")]
    Duplicate(Hash),
    #[error("mempool full (capacity {0})")]
    Full(usize),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

struct PoolState {
    order: Vec<Hash>,
    txs: HashMap<Hash, Transaction>,
}

pub struct Mempool {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(DEFAULT_MEMPOOL_CAPACITY)
    }
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(PoolState { order: Vec::new(), txs: HashMap::new() }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admits a signed transaction. Returns its canonical hash.
    pub fn push(&self, mut tx: Transaction) -> Result<Hash, MempoolError> {
        tx.verify()?;
        let hash = tx.hash(TxHasher);

        let mut state = self.state.lock();
        if state.txs.contains_key(&hash) {
            return Err(MempoolError::Duplicate(hash));
        }
        if state.order.len() >= self.capacity {
            return Err(MempoolError::Full(self.capacity));
        }

        state.order.push(hash);
        state.txs.insert(hash, tx);
        Ok(hash)
    }

    /// Removes and returns up to `n` transactions in arrival order.
    pub fn drain(&self, n: usize) -> Vec<Transaction> {
        let mut state = self.state.lock();
        let take = n.min(state.order.len());
        let hashes: Vec<Hash> = state.order.drain(..take).collect();
        hashes.iter().filter_map(|h| state.txs.remove(h)).collect()
    }

    /// Drops transactions already included in a block.
    pub fn remove_included(&self, txs: &[Transaction]) {
        let mut state = self.state.lock();
        for tx in txs {
            let hash = TxHasher.hash(tx);
            if state.txs.remove(&hash).is_some() {
                state.order.retain(|h| *h != hash);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Address, PrivateKey};

    fn signed_tx(value: u64) -> Transaction {
        let key = PrivateKey::generate();
        let mut tx = Transaction::new(b"p".to_vec(), Address([2u8; 32]), value);
        tx.sign(&key).unwrap();
        tx
    }

    #[test]
    fn push_then_drain_preserves_arrival_order() {
        let pool = Mempool::new(8);
        let a = signed_tx(1);
        let b = signed_tx(2);
        pool.push(a.clone()).unwrap();
        pool.push(b.clone()).unwrap();

        let drained = pool.drain(10);
        assert_eq!(drained, vec![a, b]);
        assert!(pool.is_empty());
    }

    #[test]
    fn duplicates_and_unsigned_txs_are_rejected() {
        let pool = Mempool::new(8);
        let tx = signed_tx(1);
        pool.push(tx.clone()).unwrap();
        assert!(matches!(pool.push(tx), Err(MempoolError::Duplicate(_))));

        let unsigned = Transaction::new(vec![], Address([0u8; 32]), 1);
        assert!(matches!(pool.push(unsigned), Err(MempoolError::Transaction(_))));
    }

    #[test]
    fn capacity_is_enforced() {
        let pool = Mempool::new(1);
        pool.push(signed_tx(1)).unwrap();
        assert!(matches!(pool.push(signed_tx(2)), Err(MempoolError::Full(1))));
    }

    #[test]
    fn included_txs_are_removed() {
        let pool = Mempool::new(8);
        let tx = signed_tx(1);
        pool.push(tx.clone()).unwrap();
        pool.remove_included(&[tx]);
        assert!(pool.is_empty());
    }
}
