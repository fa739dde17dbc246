use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::transaction::lock_manager::{LockError, LockManager};
use crate::transaction::transaction::{Transaction, TransactionState};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecord;

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction is not active")]
    NotActive,

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Hands out transaction ids and drives the commit/abort protocol:
/// BEGIN/COMMIT/ABORT log records, commit durability via group commit, and
/// release of every tuple lock at the end (strict 2PL).
pub struct TransactionManager {
    next_txn_id: AtomicI32,
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Option<Arc<LogManager>>) -> Self {
        Self {
            next_txn_id: AtomicI32::new(0),
            lock_manager,
            log_manager,
        }
    }

    /// Start a transaction. Ids are assigned monotonically, so a smaller id
    /// always means an older transaction for wait-die.
    pub fn begin(&self) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id));
        if let Some(log_manager) = self.logging() {
            let mut record = LogRecord::new_begin(txn_id);
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
        }
        txn
    }

    /// Commit: log COMMIT, wait until it is durable (riding the group
    /// commit), then release all locks.
    pub fn commit(&self, txn: &Transaction) -> Result<(), TransactionError> {
        if matches!(
            txn.state(),
            TransactionState::Committed | TransactionState::Aborted
        ) {
            return Err(TransactionError::NotActive);
        }
        txn.set_state(TransactionState::Committed);

        if let Some(log_manager) = self.logging() {
            let mut record = LogRecord::new_commit(txn.id(), txn.prev_lsn());
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            while log_manager.persistent_lsn() < lsn {
                log_manager.flush(false);
            }
        }

        self.release_all_locks(txn)
    }

    /// Abort: log ABORT and release all locks. Undoing the transaction's
    /// data effects is recovery's job.
    pub fn abort(&self, txn: &Transaction) -> Result<(), TransactionError> {
        if matches!(
            txn.state(),
            TransactionState::Committed | TransactionState::Aborted
        ) {
            return Err(TransactionError::NotActive);
        }
        txn.set_state(TransactionState::Aborted);

        if let Some(log_manager) = self.logging() {
            let mut record = LogRecord::new_abort(txn.id(), txn.prev_lsn());
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            log_manager.flush(true);
        }

        self.release_all_locks(txn)
    }

    fn release_all_locks(&self, txn: &Transaction) -> Result<(), TransactionError> {
        let (shared, exclusive) = txn.held_locks();
        for rid in shared.into_iter().chain(exclusive) {
            self.lock_manager.unlock(txn, rid)?;
        }
        Ok(())
    }

    fn logging(&self) -> Option<&Arc<LogManager>> {
        self.log_manager
            .as_ref()
            .filter(|log_manager| log_manager.is_enabled())
    }
}
