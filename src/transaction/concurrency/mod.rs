pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;
pub mod waits_for;

pub use lock_manager::{LockManager, LockManagerConfig};
pub use transaction::{
    AbortReason, IsolationLevel, LockMode, Transaction, TransactionAbort, TransactionState,
};
pub use transaction_manager::TransactionManager;
