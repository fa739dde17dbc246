// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::config::EngineConfig;
pub use index::btree::{BPlusTree, BTreeError};
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use storage::page::PageManager;
pub use transaction::lock_manager::{LockError, LockManager};
pub use transaction::transaction::{Transaction, TransactionState};
pub use transaction::transaction_manager::TransactionManager;
pub use transaction::wal::log_manager::LogManager;
pub use transaction::wal::recovery::LogRecovery;
