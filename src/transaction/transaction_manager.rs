use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Transaction manager - creates and tracks transactions, and releases
/// their locks when they finish.
///
/// Ids start at 0 and only grow, so the first transaction is the oldest
/// one wound-wait will ever see.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit a transaction, releasing every lock it still holds.
    /// A transaction that was wounded cannot commit.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(TransactionError::InvalidState(txn.id()));
            }
            _ => {}
        }

        self.release_locks(txn);
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());

        Ok(())
    }

    /// Abort a transaction, releasing every lock it still holds.
    /// Aborting an already-wounded transaction is how the execution
    /// layer acknowledges the wound.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        self.release_locks(txn);
        txn.set_state(TransactionState::Aborted);
        self.active_transactions.lock().remove(&txn.id());

        Ok(())
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Get all active transaction IDs
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn release_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.held_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
