use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use parking_lot::{Condvar, Mutex};
use log::{debug, info};

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, LockMode, LockSets, Transaction, TransactionAbort,
    TransactionState,
};
use crate::transaction::concurrency::waits_for::WaitsForGraph;

/// Blocked waiters wake at this cadence to recheck grantability and whether
/// the deadlock detector picked them as victim.
const WAIT_TICK: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy)]
pub struct LockManagerConfig {
    pub cycle_detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            cycle_detection_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    requests: VecDeque<LockRequest>,
    /// The single transaction currently upgrading its lock on this object,
    /// if any. It jumps ahead of every other waiter.
    upgrading: Option<TxnId>,
}

#[derive(Default)]
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

#[derive(Debug, Clone, Copy)]
enum LockTarget {
    Table(TableOid),
    Row(TableOid, Rid),
}

/// Hierarchical two-phase lock manager.
///
/// Tables take any of the five modes; rows take only S or X and require a
/// supporting table lock. Each lockable object has a request queue with its
/// own latch and condition variable; a background detector finds cycles in
/// the waits-for graph and aborts the newest transaction involved.
pub struct LockManager {
    config: LockManagerConfig,
    table_queues: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_queues: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    waits_for: Mutex<WaitsForGraph>,
    terminate_txn: Mutex<Option<TxnId>>,
    enable_cycle_detection: AtomicBool,
}

/// Standard hierarchical compatibility matrix.
fn compatible(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    match held {
        IntentionShared => requested != Exclusive,
        IntentionExclusive => matches!(requested, IntentionShared | IntentionExclusive),
        Shared => matches!(requested, IntentionShared | Shared),
        SharedIntentionExclusive => requested == IntentionShared,
        Exclusive => false,
    }
}

/// Allowed table lock upgrades: IS -> {S, X, SIX}; S -> {X, SIX};
/// IX -> {X, SIX}; SIX -> {X}.
fn valid_upgrade(from: LockMode, to: LockMode) -> bool {
    use LockMode::*;
    match from {
        IntentionShared => matches!(to, Shared | Exclusive | SharedIntentionExclusive),
        Shared | IntentionExclusive => matches!(to, Exclusive | SharedIntentionExclusive),
        SharedIntentionExclusive => to == Exclusive,
        Exclusive => false,
    }
}

fn queue_for<Q: Eq + Hash + Copy>(
    map: &Mutex<HashMap<Q, Arc<LockRequestQueue>>>,
    key: Q,
) -> Arc<LockRequestQueue> {
    Arc::clone(map.lock().entry(key).or_default())
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            config,
            table_queues: Mutex::new(HashMap::new()),
            row_queues: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(WaitsForGraph::new()),
            terminate_txn: Mutex::new(None),
            enable_cycle_detection: AtomicBool::new(false),
        }
    }

    /// Acquire a table lock, blocking until it can be granted. Policy
    /// violations abort `txn` and surface as `TransactionAbort`.
    pub fn lock_table(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        self.validate_request(txn, mode, false)?;
        let queue = queue_for(&self.table_queues, oid);
        self.acquire(txn, mode, &queue, LockTarget::Table(oid))
    }

    /// Acquire a row lock (S or X only). The transaction must already hold
    /// a table lock strong enough to cover the row mode.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        self.validate_request(txn, mode, true)?;

        let supported = match mode {
            LockMode::Shared => txn.held_table_mode(oid).is_some(),
            LockMode::Exclusive => matches!(
                txn.held_table_mode(oid),
                Some(LockMode::IntentionExclusive)
                    | Some(LockMode::Exclusive)
                    | Some(LockMode::SharedIntentionExclusive)
            ),
            _ => unreachable!("row modes were validated above"),
        };
        if !supported {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }

        let queue = queue_for(&self.row_queues, rid);
        self.acquire(txn, mode, &queue, LockTarget::Row(oid, rid))
    }

    /// Release a table lock. Fails if no granted lock exists or if row
    /// locks on the table are still held.
    pub fn unlock_table(&self, txn: &Transaction, oid: TableOid) -> Result<bool, TransactionAbort> {
        let queue = self.table_queues.lock().get(&oid).cloned();
        let Some(queue) = queue else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mut state = queue.state.lock();
        let Some(idx) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        if txn.holds_row_locks_on(oid) {
            drop(state);
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let mode = state.requests[idx].mode;
        state.requests.remove(idx);
        txn.with_locks(|locks| {
            locks.table_set_mut(mode).remove(&oid);
        });
        self.update_state_on_unlock(txn, mode);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Release a row lock.
    pub fn unlock_row(
        &self,
        txn: &Transaction,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        let queue = self.row_queues.lock().get(&rid).cloned();
        let Some(queue) = queue else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mut state = queue.state.lock();
        let Some(idx) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mode = state.requests[idx].mode;
        state.requests.remove(idx);
        txn.with_locks(|locks| {
            if let Some(rids) = locks.row_set_mut(mode).get_mut(&oid) {
                rids.remove(&rid);
            }
        });
        self.update_state_on_unlock(txn, mode);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Drop every lock `txn` still holds, without state transitions. Called
    /// by the transaction manager on commit and abort.
    pub fn release_all(&self, txn: &Transaction) {
        for (_, _, rid) in txn.row_locks() {
            if let Some(queue) = self.row_queues.lock().get(&rid).cloned() {
                Self::drop_request(&queue, txn.id());
            }
        }
        for (_, oid) in txn.table_locks() {
            if let Some(queue) = self.table_queues.lock().get(&oid).cloned() {
                Self::drop_request(&queue, txn.id());
            }
        }
        txn.with_locks(|locks| *locks = LockSets::default());
        self.waits_for.lock().remove_txn(txn.id());
    }

    /// Current waits-for edges as `(waiter, holder)` pairs. Test support.
    pub fn waits_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        self.waits_for.lock().edges()
    }

    /// Spawn the background deadlock detector.
    pub fn start_cycle_detection(self: &Arc<Self>) -> JoinHandle<()> {
        self.enable_cycle_detection.store(true, Ordering::SeqCst);
        let lock_manager = Arc::clone(self);
        std::thread::spawn(move || lock_manager.run_cycle_detection())
    }

    pub fn stop_cycle_detection(&self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
    }

    /// Detector loop: every interval, look for a cycle in the waits-for
    /// graph, publish the victim and wake all waiters so the victim can
    /// abort itself.
    fn run_cycle_detection(&self) {
        while self.enable_cycle_detection.load(Ordering::SeqCst) {
            std::thread::sleep(self.config.cycle_detection_interval);
            let victim = self.waits_for.lock().find_victim();
            if let Some(victim) = victim {
                info!("deadlock detected; transaction {victim} chosen as victim");
                *self.terminate_txn.lock() = Some(victim);
                self.notify_all_queues();
            }
        }
    }

    fn notify_all_queues(&self) {
        for queue in self.table_queues.lock().values() {
            queue.cv.notify_all();
        }
        for queue in self.row_queues.lock().values() {
            queue.cv.notify_all();
        }
    }

    /// Shared acquire path for tables and rows.
    fn acquire(
        &self,
        txn: &Transaction,
        mode: LockMode,
        queue: &Arc<LockRequestQueue>,
        target: LockTarget,
    ) -> Result<bool, TransactionAbort> {
        let txn_id = txn.id();
        let mut state = queue.state.lock();

        match state.requests.iter().position(|r| r.txn_id == txn_id) {
            Some(idx) => {
                let held_mode = state.requests[idx].mode;
                debug_assert!(state.requests[idx].granted);
                if held_mode == mode {
                    return Ok(true);
                }
                if state.upgrading.is_some() {
                    drop(state);
                    return Err(self.abort(txn, AbortReason::UpgradeConflict));
                }
                let allowed = match target {
                    LockTarget::Table(_) => valid_upgrade(held_mode, mode),
                    // The only row upgrade is S -> X.
                    LockTarget::Row(..) => held_mode == LockMode::Shared,
                };
                if !allowed {
                    drop(state);
                    return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
                }
                state.upgrading = Some(txn_id);
            }
            None => state.requests.push_back(LockRequest {
                txn_id,
                mode,
                granted: false,
            }),
        }

        loop {
            let blockers = Self::blocking_holders(&state, txn_id, mode);
            let may_proceed = match state.upgrading {
                Some(upgrader) => upgrader == txn_id,
                None => true,
            };

            if may_proceed && blockers.is_empty() {
                let idx = state
                    .requests
                    .iter()
                    .position(|r| r.txn_id == txn_id)
                    .expect("request was queued above");
                if state.upgrading == Some(txn_id) {
                    let old_mode = state.requests[idx].mode;
                    self.remove_from_lock_set(txn, old_mode, target);
                    state.requests[idx].mode = mode;
                    state.upgrading = None;
                }
                state.requests[idx].granted = true;
                self.add_to_lock_set(txn, mode, target);
                self.waits_for.lock().set_edges(txn_id, []);
                debug!("txn {txn_id} granted {mode} on {target:?}");
                return Ok(true);
            }

            // Still blocked: refresh our waits-for edges, then sleep one
            // tick so both the cv signal and the victim flag are observed.
            self.waits_for.lock().set_edges(txn_id, blockers);
            let _ = queue.cv.wait_for(&mut state, WAIT_TICK);

            if *self.terminate_txn.lock() == Some(txn_id) {
                if state.upgrading == Some(txn_id) {
                    // The old granted request survives the failed upgrade.
                    state.upgrading = None;
                } else if let Some(idx) = state
                    .requests
                    .iter()
                    .position(|r| r.txn_id == txn_id && !r.granted)
                {
                    state.requests.remove(idx);
                }
                txn.set_state(TransactionState::Aborted);
                self.waits_for.lock().set_edges(txn_id, []);
                *self.terminate_txn.lock() = None;
                queue.cv.notify_all();
                return Err(TransactionAbort {
                    txn_id,
                    reason: AbortReason::Deadlock,
                });
            }
        }
    }

    /// Granted requests of other transactions whose mode is incompatible
    /// with `mode`.
    fn blocking_holders(state: &QueueState, txn_id: TxnId, mode: LockMode) -> Vec<TxnId> {
        state
            .requests
            .iter()
            .filter(|r| r.granted && r.txn_id != txn_id && !compatible(r.mode, mode))
            .map(|r| r.txn_id)
            .collect()
    }

    /// Isolation-level policing on lock acquisition.
    fn validate_request(
        &self,
        txn: &Transaction,
        mode: LockMode,
        is_row: bool,
    ) -> Result<(), TransactionAbort> {
        if is_row && !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        let shrinking = txn.state() == TransactionState::Shrinking;
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if shrinking && !matches!(mode, LockMode::Shared | LockMode::IntentionShared) {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if matches!(
                    mode,
                    LockMode::Shared
                        | LockMode::IntentionShared
                        | LockMode::SharedIntentionExclusive
                ) {
                    return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// Unlocking S or X locks moves the transaction into its shrinking
    /// phase, depending on the isolation level.
    fn update_state_on_unlock(&self, txn: &Transaction, mode: LockMode) {
        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => return,
            _ => {}
        }
        match mode {
            LockMode::Shared => match txn.isolation_level() {
                IsolationLevel::RepeatableRead => txn.set_state(TransactionState::Shrinking),
                IsolationLevel::ReadCommitted => {}
                IsolationLevel::ReadUncommitted => {
                    unreachable!("shared locks are never granted under READ UNCOMMITTED")
                }
            },
            LockMode::Exclusive => txn.set_state(TransactionState::Shrinking),
            _ => {}
        }
    }

    fn add_to_lock_set(&self, txn: &Transaction, mode: LockMode, target: LockTarget) {
        txn.with_locks(|locks| match target {
            LockTarget::Table(oid) => {
                locks.table_set_mut(mode).insert(oid);
            }
            LockTarget::Row(oid, rid) => {
                locks.row_set_mut(mode).entry(oid).or_default().insert(rid);
            }
        });
    }

    fn remove_from_lock_set(&self, txn: &Transaction, mode: LockMode, target: LockTarget) {
        txn.with_locks(|locks| match target {
            LockTarget::Table(oid) => {
                locks.table_set_mut(mode).remove(&oid);
            }
            LockTarget::Row(oid, rid) => {
                if let Some(rids) = locks.row_set_mut(mode).get_mut(&oid) {
                    rids.remove(&rid);
                }
            }
        });
    }

    fn drop_request(queue: &LockRequestQueue, txn_id: TxnId) {
        let mut state = queue.state.lock();
        if let Some(idx) = state.requests.iter().position(|r| r.txn_id == txn_id) {
            state.requests.remove(idx);
        }
        if state.upgrading == Some(txn_id) {
            state.upgrading = None;
        }
        queue.cv.notify_all();
    }

    /// Mark the transaction aborted before surfacing the reason, so the
    /// caller's cleanup sees the final state.
    fn abort(&self, txn: &Transaction, reason: AbortReason) -> TransactionAbort {
        txn.set_state(TransactionState::Aborted);
        TransactionAbort {
            txn_id: txn.id(),
            reason,
        }
    }
}
