use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{Transaction, TransactionState};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LockError {
    #[error("Transaction {0} aborted by lock protocol violation")]
    TxnAborted(TxnId),

    #[error("Transaction {0} chosen as wait-die victim")]
    DeadlockVictim(TxnId),

    #[error("Transaction {0} holds no lock on the requested tuple")]
    LockNotHeld(TxnId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
    Upgrading,
}

/// Per-waiter grant flag with its own condition variable, so a queued
/// request can block after the queue mutex is released.
struct WaitState {
    granted: Mutex<bool>,
    cv: Condvar,
}

impl WaitState {
    fn new(granted: bool) -> Arc<Self> {
        Arc::new(Self {
            granted: Mutex::new(granted),
            cv: Condvar::new(),
        })
    }

    fn wait(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.cv.wait(&mut granted);
        }
    }

    fn grant(&self) {
        let mut granted = self.granted.lock();
        *granted = true;
        self.cv.notify_one();
    }

    fn is_granted(&self) -> bool {
        *self.granted.lock()
    }
}

struct TxItem {
    txn_id: TxnId,
    mode: LockMode,
    wait: Arc<WaitState>,
}

/// Request queue for one RID. Granted items always form a compatible prefix:
/// a run of shared holders, or a single exclusive holder.
#[derive(Default)]
struct TxList {
    locks: Vec<TxItem>,
    has_upgrading: bool,
    /// Set when the queue has been removed from the table; a request that
    /// raced the removal must re-index.
    detached: bool,
}

impl TxList {
    /// A request is granted immediately only when the queue is empty, or
    /// when it is shared and the queue tail is a granted shared item.
    fn can_grant(&self, mode: LockMode) -> bool {
        let Some(last) = self.locks.last() else {
            return true;
        };
        if mode == LockMode::Shared {
            return last.mode == LockMode::Shared && last.wait.is_granted();
        }
        false
    }
}

/// Tuple-granularity lock manager under (strict) 2PL, with wait-die
/// deadlock prevention: only older transactions wait; a younger requester
/// that would have to wait dies instead.
pub struct LockManager {
    strict_2pl: bool,
    table: Mutex<HashMap<Rid, Arc<Mutex<TxList>>>>,
}

impl LockManager {
    pub fn new(strict_2pl: bool) -> Self {
        Self {
            strict_2pl,
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> Result<(), LockError> {
        self.lock_internal(txn, rid, LockMode::Shared)
    }

    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> Result<(), LockError> {
        self.lock_internal(txn, rid, LockMode::Exclusive)
    }

    /// Upgrade a held shared lock to exclusive. The shared item leaves the
    /// queue first; at most one upgrade may be in flight per RID.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> Result<(), LockError> {
        self.lock_internal(txn, rid, LockMode::Upgrading)
    }

    fn lock_internal(&self, txn: &Transaction, rid: Rid, mode: LockMode) -> Result<(), LockError> {
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::TxnAborted(txn.id()));
        }

        loop {
            // Index into the table, release the table mutex, then work under
            // the queue's own mutex.
            let list_arc = {
                let mut table = self.table.lock();
                table.entry(rid).or_default().clone()
            };
            let mut list = list_arc.lock();
            if list.detached {
                continue;
            }

            if mode == LockMode::Upgrading {
                if list.has_upgrading {
                    txn.set_state(TransactionState::Aborted);
                    return Err(LockError::TxnAborted(txn.id()));
                }
                let position = list.locks.iter().position(|item| item.txn_id == txn.id());
                match position {
                    Some(idx)
                        if list.locks[idx].mode == LockMode::Shared
                            && list.locks[idx].wait.is_granted() =>
                    {
                        list.locks.remove(idx);
                        txn.remove_shared_lock(&rid);
                    }
                    _ => {
                        txn.set_state(TransactionState::Aborted);
                        return Err(LockError::TxnAborted(txn.id()));
                    }
                }
            }

            let can_grant = list.can_grant(mode);

            // Wait-die: a requester younger than the youngest queued
            // transaction dies instead of waiting.
            if !can_grant {
                if let Some(last) = list.locks.last() {
                    if last.txn_id < txn.id() {
                        txn.set_state(TransactionState::Aborted);
                        return Err(LockError::DeadlockVictim(txn.id()));
                    }
                }
            }

            let upgrading = mode == LockMode::Upgrading;
            let effective_mode = if upgrading && can_grant {
                LockMode::Exclusive
            } else {
                mode
            };
            let wait = WaitState::new(can_grant);
            list.locks.push(TxItem {
                txn_id: txn.id(),
                mode: effective_mode,
                wait: wait.clone(),
            });
            if !can_grant {
                list.has_upgrading |= upgrading;
                drop(list);
                wait.wait();
            }

            // Once granted, an upgrade has been promoted to exclusive.
            if effective_mode == LockMode::Shared {
                txn.add_shared_lock(rid);
            } else {
                txn.add_exclusive_lock(rid);
            }
            return Ok(());
        }
    }

    /// Release this transaction's lock on `rid` and hand the lock to the
    /// longest-waiting compatible requests.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> Result<(), LockError> {
        if self.strict_2pl {
            if !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            ) {
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::TxnAborted(txn.id()));
            }
        } else if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        let mut table = self.table.lock();
        let list_arc = table
            .get(&rid)
            .cloned()
            .ok_or(LockError::LockNotHeld(txn.id()))?;
        let mut list = list_arc.lock();

        let idx = list
            .locks
            .iter()
            .position(|item| item.txn_id == txn.id())
            .ok_or(LockError::LockNotHeld(txn.id()))?;
        let removed = list.locks.remove(idx);
        match removed.mode {
            LockMode::Shared => {
                txn.remove_shared_lock(&rid);
            }
            _ => {
                txn.remove_exclusive_lock(&rid);
            }
        }

        if list.locks.is_empty() {
            list.detached = true;
            table.remove(&rid);
            return Ok(());
        }
        drop(table);

        // Grant walk from the head: wake every waiter compatible with the
        // already-granted prefix; an exclusive (or promoted upgrade) grant
        // ends the walk, and an exclusive waiter behind any granted item
        // keeps waiting.
        let mut any_granted = false;
        for i in 0..list.locks.len() {
            if list.locks[i].wait.is_granted() {
                any_granted = true;
                if list.locks[i].mode == LockMode::Shared {
                    continue;
                }
                break;
            }
            match list.locks[i].mode {
                LockMode::Shared => {
                    list.locks[i].wait.grant();
                    any_granted = true;
                }
                LockMode::Upgrading => {
                    if any_granted {
                        break;
                    }
                    list.has_upgrading = false;
                    list.locks[i].mode = LockMode::Exclusive;
                    list.locks[i].wait.grant();
                    break;
                }
                LockMode::Exclusive => {
                    if any_granted {
                        break;
                    }
                    list.locks[i].wait.grant();
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_locks_coexist() {
        let manager = LockManager::new(false);
        let t0 = Transaction::new(0);
        let t1 = Transaction::new(1);
        let rid = Rid::new(1, 0);

        manager.lock_shared(&t0, rid).unwrap();
        manager.lock_shared(&t1, rid).unwrap();
        assert!(t0.is_shared_locked(&rid));
        assert!(t1.is_shared_locked(&rid));

        manager.unlock(&t0, rid).unwrap();
        manager.unlock(&t1, rid).unwrap();
    }

    #[test]
    fn lock_after_shrinking_aborts() {
        let manager = LockManager::new(false);
        let txn = Transaction::new(0);
        let a = Rid::new(1, 0);
        let b = Rid::new(1, 1);

        manager.lock_shared(&txn, a).unwrap();
        manager.unlock(&txn, a).unwrap(); // basic 2PL: now shrinking
        assert_eq!(txn.state(), TransactionState::Shrinking);
        assert_eq!(
            manager.lock_shared(&txn, b),
            Err(LockError::TxnAborted(0))
        );
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn strict_2pl_blocks_early_unlock() {
        let manager = LockManager::new(true);
        let txn = Transaction::new(0);
        let rid = Rid::new(1, 0);

        manager.lock_exclusive(&txn, rid).unwrap();
        assert_eq!(manager.unlock(&txn, rid), Err(LockError::TxnAborted(0)));

        let txn2 = Transaction::new(1);
        manager.lock_exclusive(&txn2, Rid::new(2, 0)).unwrap();
        txn2.set_state(TransactionState::Committed);
        manager.unlock(&txn2, Rid::new(2, 0)).unwrap();
    }

    #[test]
    fn younger_exclusive_requester_dies() {
        let manager = LockManager::new(false);
        let older = Transaction::new(0);
        let younger = Transaction::new(5);
        let rid = Rid::new(1, 0);

        manager.lock_exclusive(&older, rid).unwrap();
        assert_eq!(
            manager.lock_exclusive(&younger, rid),
            Err(LockError::DeadlockVictim(5))
        );
        assert_eq!(younger.state(), TransactionState::Aborted);
    }

    #[test]
    fn upgrade_promotes_sole_shared_holder() {
        let manager = LockManager::new(false);
        let txn = Transaction::new(0);
        let rid = Rid::new(1, 0);

        manager.lock_shared(&txn, rid).unwrap();
        manager.lock_upgrade(&txn, rid).unwrap();
        assert!(!txn.is_shared_locked(&rid));
        assert!(txn.is_exclusive_locked(&rid));
        manager.unlock(&txn, rid).unwrap();
    }

    #[test]
    fn upgrade_without_shared_lock_aborts() {
        let manager = LockManager::new(false);
        let holder = Transaction::new(0);
        let other = Transaction::new(1);
        let rid = Rid::new(1, 0);

        manager.lock_shared(&holder, rid).unwrap();
        assert_eq!(
            manager.lock_upgrade(&other, rid),
            Err(LockError::TxnAborted(1))
        );
    }
}
