pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;
pub mod wal;

pub use lock_manager::{LockError, LockManager};
pub use transaction::{Transaction, TransactionState};
pub use transaction_manager::{TransactionError, TransactionManager};
