// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::{BPlusTree, BTreeError, KeyCodec};
pub use storage::buffer::{BufferPoolConfig, BufferPoolError, BufferPoolManager, PageGuard};
pub use transaction::concurrency::{
    IsolationLevel, LockManager, LockManagerConfig, LockMode, Transaction, TransactionManager,
};
