use std::collections::HashSet;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under two-phase locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why the lock manager told a transaction to abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Deadlock,
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {txn_id} aborted: {reason:?}")]
    Abort { txn_id: TxnId, reason: AbortReason },

    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Transaction {0} not found")]
    NotFound(TxnId),
}

/// An active database transaction.
///
/// State and lock sets sit behind mutexes because wound-wait mutates
/// *other* transactions through shared handles, not just the caller's.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().remove(&rid)
    }

    pub fn remove_exclusive_lock(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().remove(&rid)
    }

    /// Drop the rid from whichever lock set holds it
    pub fn remove_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Every rid this transaction currently holds a lock on
    pub fn held_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }
}
