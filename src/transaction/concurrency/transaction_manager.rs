use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use parking_lot::Mutex;
use log::debug;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Hands out transaction ids, tracks live transactions and drives the
/// terminal transitions: commit and abort both release every lock still
/// held so blocked peers can make progress.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    txn_map: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionManager {
    /// Create a manager and start the lock manager's deadlock detector.
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        let detector = lock_manager.start_cycle_detection();
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            txn_map: Mutex::new(HashMap::new()),
            detector: Mutex::new(Some(detector)),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Start a new transaction.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.txn_map.lock().insert(txn_id, Arc::clone(&txn));
        debug!("txn {txn_id} begins at {isolation_level:?}");
        txn
    }

    /// Commit: release all locks and retire the transaction.
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.lock_manager.release_all(txn);
        self.txn_map.lock().remove(&txn.id());
        debug!("txn {} committed", txn.id());
    }

    /// Abort: release all locks and retire the transaction. Also the
    /// cleanup path after a `TransactionAbort` error.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all(txn);
        self.txn_map.lock().remove(&txn.id());
        debug!("txn {} aborted", txn.id());
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.lock().get(&txn_id).cloned()
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        self.lock_manager.stop_cycle_detection();
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }
}
