use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::common::types::{Lsn, PageId, PageLatch, Rid, TxnId, INVALID_LSN};

/// 2PL life cycle of a transaction. Lock acquisition is only legal while
/// GROWING; the first release (under basic 2PL) moves it to SHRINKING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// An active transaction.
///
/// Besides the 2PL state and lock sets this carries the two pieces of
/// per-descent B+tree context: the ordered set of latched-and-pinned pages
/// (released in acquisition order when a descent finishes or turns safe) and
/// the set of pages scheduled for deletion once their latches drop.
pub struct Transaction {
    txn_id: TxnId,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    page_set: Mutex<VecDeque<PageLatch>>,
    deleted_page_set: Mutex<HashSet<PageId>>,
    prev_lsn: AtomicI32,
}

impl Transaction {
    pub fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            page_set: Mutex::new(VecDeque::new()),
            deleted_page_set: Mutex::new(HashSet::new()),
            prev_lsn: AtomicI32::new(INVALID_LSN),
        }
    }

    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }

    // Lock bookkeeping, maintained by the lock manager.

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: &Rid) -> bool {
        self.shared_lock_set.lock().remove(rid)
    }

    pub fn remove_exclusive_lock(&self, rid: &Rid) -> bool {
        self.exclusive_lock_set.lock().remove(rid)
    }

    pub fn is_shared_locked(&self, rid: &Rid) -> bool {
        self.shared_lock_set.lock().contains(rid)
    }

    pub fn is_exclusive_locked(&self, rid: &Rid) -> bool {
        self.exclusive_lock_set.lock().contains(rid)
    }

    /// Snapshot of all held locks, shared then exclusive.
    pub fn held_locks(&self) -> (Vec<Rid>, Vec<Rid>) {
        (
            self.shared_lock_set.lock().iter().copied().collect(),
            self.exclusive_lock_set.lock().iter().copied().collect(),
        )
    }

    // Per-descent index context.

    pub fn page_set(&self) -> MutexGuard<'_, VecDeque<PageLatch>> {
        self.page_set.lock()
    }

    pub fn deleted_page_set(&self) -> MutexGuard<'_, HashSet<PageId>> {
        self.deleted_page_set.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        let txn = Transaction::new(1);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        txn.set_state(TransactionState::Shrinking);
        assert_eq!(txn.state(), TransactionState::Shrinking);
    }

    #[test]
    fn lock_sets_track_rids() {
        let txn = Transaction::new(2);
        let rid = Rid::new(3, 4);
        txn.add_shared_lock(rid);
        assert!(txn.is_shared_locked(&rid));
        assert!(!txn.is_exclusive_locked(&rid));
        assert!(txn.remove_shared_lock(&rid));
        assert!(!txn.remove_shared_lock(&rid));
    }

    #[test]
    fn prev_lsn_starts_invalid() {
        let txn = Transaction::new(3);
        assert_eq!(txn.prev_lsn(), INVALID_LSN);
        txn.set_prev_lsn(17);
        assert_eq!(txn.prev_lsn(), 17);
    }
}
