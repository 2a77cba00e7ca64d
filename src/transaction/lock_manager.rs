use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::Rid;
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    upgrading: bool,
    // Waiters sleep on the manager's single latch; each queue gets its
    // own condvar so an unlock only wakes contenders for that rid
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            upgrading: false,
            cv: Arc::new(Condvar::new()),
        }
    }
}

/// Per-record two-phase-locking lock manager with wound-wait deadlock
/// avoidance.
///
/// Lower transaction ids are older. An older transaction wounds (aborts)
/// younger lock holders in its way; a younger transaction waits for
/// older holders. Waits-for edges therefore only ever point from younger
/// to older, which keeps the graph acyclic.
pub struct LockManager {
    latch: Mutex<HashMap<Rid, LockRequestQueue>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(HashMap::new()),
        }
    }

    /// Take a shared lock on `rid`, waiting out older exclusive holders
    /// and wounding younger ones
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }
        // Read-uncommitted readers do not take shared locks at all
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let txn_id = txn.id();
        let mut table = self.latch.lock();

        loop {
            let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);

            // Wounded while we slept
            if txn.state() == TransactionState::Aborted {
                queue.requests.retain(|r| r.txn.id() != txn_id);
                queue.cv.notify_all();
                return Err(TransactionError::Abort {
                    txn_id,
                    reason: AbortReason::Deadlock,
                });
            }

            let mut wounded = false;
            let mut must_wait = false;
            queue.requests.retain(|r| {
                if r.txn.id() == txn_id || r.mode != LockMode::Exclusive || !r.granted {
                    return true;
                }
                if r.txn.id() > txn_id {
                    Self::wound(r, rid);
                    wounded = true;
                    return false;
                }
                must_wait = true;
                true
            });
            if wounded {
                queue.cv.notify_all();
            }

            if !must_wait {
                if let Some(request) = queue.requests.iter_mut().find(|r| r.txn.id() == txn_id) {
                    request.granted = true;
                } else {
                    queue.requests.push_back(LockRequest {
                        txn: txn.clone(),
                        mode: LockMode::Shared,
                        granted: true,
                    });
                }
                txn.add_shared_lock(rid);
                txn.set_state(TransactionState::Growing);
                return Ok(());
            }

            // An older exclusive holder is in the way: park and sleep
            if !queue.requests.iter().any(|r| r.txn.id() == txn_id) {
                queue.requests.push_back(LockRequest {
                    txn: txn.clone(),
                    mode: LockMode::Shared,
                    granted: false,
                });
            }
            let cv = queue.cv.clone();
            cv.wait(&mut table);
        }
    }

    /// Take an exclusive lock on `rid`. Never waits: younger holders are
    /// wounded, an older holder wounds the caller instead.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }
        // Strict 2PL is only promised under repeatable read; the weaker
        // levels may keep writing after their reads unlocked
        if txn.state() == TransactionState::Shrinking
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let txn_id = txn.id();
        let mut table = self.latch.lock();
        let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);

        // One scan in queue order: younger holders are wounded as they
        // are met; the first older holder ends the scan and wounds the
        // caller instead, leaving the rest of the queue untouched
        let mut wounded = false;
        let mut blocked_by_older = false;
        let mut i = 0;
        while i < queue.requests.len() {
            if queue.requests[i].txn.id() == txn_id {
                i += 1;
                continue;
            }
            if queue.requests[i].txn.id() > txn_id {
                Self::wound(&queue.requests[i], rid);
                wounded = true;
                let _ = queue.requests.remove(i);
                continue;
            }
            blocked_by_older = true;
            break;
        }
        if wounded {
            queue.cv.notify_all();
        }

        if blocked_by_older {
            txn.set_state(TransactionState::Aborted);
            txn.remove_lock(rid);
            queue.requests.retain(|r| r.txn.id() != txn_id);
            queue.cv.notify_all();
            return Err(TransactionError::Abort {
                txn_id,
                reason: AbortReason::Deadlock,
            });
        }

        // A shared lock we already hold becomes the exclusive one
        if let Some(request) = queue.requests.iter_mut().find(|r| r.txn.id() == txn_id) {
            request.mode = LockMode::Exclusive;
            request.granted = true;
            txn.remove_shared_lock(rid);
        } else {
            queue.requests.push_back(LockRequest {
                txn: txn.clone(),
                mode: LockMode::Exclusive,
                granted: true,
            });
        }
        txn.add_exclusive_lock(rid);
        txn.set_state(TransactionState::Growing);
        Ok(())
    }

    /// Upgrade a held shared lock to exclusive. At most one transaction
    /// may be upgrading per rid; the rest abort with UPGRADE_CONFLICT.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }
        if txn.state() == TransactionState::Shrinking
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let txn_id = txn.id();
        let mut table = self.latch.lock();

        {
            let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
            if queue.upgrading {
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::Abort {
                    txn_id,
                    reason: AbortReason::UpgradeConflict,
                });
            }
            queue.upgrading = true;
        }

        loop {
            let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);

            if txn.state() == TransactionState::Aborted {
                queue.upgrading = false;
                queue.requests.retain(|r| r.txn.id() != txn_id);
                queue.cv.notify_all();
                return Err(TransactionError::Abort {
                    txn_id,
                    reason: AbortReason::Deadlock,
                });
            }

            let mut wounded = false;
            let mut must_wait = false;
            queue.requests.retain(|r| {
                if r.txn.id() == txn_id {
                    return true;
                }
                if r.txn.id() > txn_id {
                    Self::wound(r, rid);
                    wounded = true;
                    return false;
                }
                must_wait = true;
                true
            });
            if wounded {
                queue.cv.notify_all();
            }

            if !must_wait {
                // Only our own request is left; flip it in place
                if let Some(request) = queue.requests.iter_mut().find(|r| r.txn.id() == txn_id) {
                    request.mode = LockMode::Exclusive;
                    request.granted = true;
                } else {
                    queue.requests.push_back(LockRequest {
                        txn: txn.clone(),
                        mode: LockMode::Exclusive,
                        granted: true,
                    });
                }
                queue.upgrading = false;
                txn.remove_shared_lock(rid);
                txn.add_exclusive_lock(rid);
                txn.set_state(TransactionState::Growing);
                return Ok(());
            }

            let cv = queue.cv.clone();
            cv.wait(&mut table);
        }
    }

    /// Release this transaction's lock on `rid` and wake the queue.
    /// Under repeatable read, the first unlock of a growing transaction
    /// moves it to its shrinking phase.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.latch.lock();

        let queue = match table.get_mut(&rid) {
            Some(queue) => queue,
            None => return false,
        };

        if txn.state() == TransactionState::Growing
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Shrinking);
        }

        let txn_id = txn.id();
        let removed = match queue.requests.iter().position(|r| r.txn.id() == txn_id) {
            Some(pos) => queue.requests.remove(pos).is_some(),
            None => false,
        };

        txn.remove_lock(rid);
        queue.cv.notify_all();

        removed
    }

    /// Abort `request`'s transaction on behalf of an older one
    fn wound(request: &LockRequest, rid: Rid) {
        debug!(
            "wound-wait: aborting txn {} holding {:?} on {:?}",
            request.txn.id(),
            request.mode,
            rid
        );
        request.txn.set_state(TransactionState::Aborted);
        request.txn.remove_lock(rid);
    }
}
