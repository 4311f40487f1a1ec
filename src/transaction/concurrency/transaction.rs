use std::collections::{HashMap, HashSet};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states. A transaction grows while it acquires locks
/// and shrinks once it gives the first one up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Hierarchical lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LockMode::IntentionShared => "IS",
            LockMode::IntentionExclusive => "IX",
            LockMode::Shared => "S",
            LockMode::SharedIntentionExclusive => "SIX",
            LockMode::Exclusive => "X",
        };
        write!(f, "{name}")
    }
}

/// Why a transaction was aborted by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    UpgradeConflict,
    IncompatibleUpgrade,
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    AttemptedUnlockButNoLockHeld,
    TableUnlockedBeforeUnlockingRows,
    TableLockNotPresent,
    AttemptedIntentionLockOnRow,
    Deadlock,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            AbortReason::UpgradeConflict => "another transaction is already upgrading",
            AbortReason::IncompatibleUpgrade => "the requested upgrade is not allowed",
            AbortReason::LockOnShrinking => "lock acquired in the shrinking phase",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared locks are not permitted under READ UNCOMMITTED"
            }
            AbortReason::AttemptedUnlockButNoLockHeld => "no matching lock is held",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "table unlocked while row locks are still held"
            }
            AbortReason::TableLockNotPresent => "no suitable table lock for the row lock",
            AbortReason::AttemptedIntentionLockOnRow => "intention locks cannot be taken on rows",
            AbortReason::Deadlock => "chosen as deadlock victim",
        };
        write!(f, "{text}")
    }
}

/// Structured abort raised by the lock manager. The transaction's state is
/// set to `Aborted` before this is returned, so cleanup code observes the
/// final state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// Everything a transaction currently holds, grouped by mode. The lock
/// manager is the only writer.
#[derive(Debug, Default)]
pub struct LockSets {
    pub shared_tables: HashSet<TableOid>,
    pub exclusive_tables: HashSet<TableOid>,
    pub intention_shared_tables: HashSet<TableOid>,
    pub intention_exclusive_tables: HashSet<TableOid>,
    pub shared_intention_exclusive_tables: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl LockSets {
    pub fn table_set(&self, mode: LockMode) -> &HashSet<TableOid> {
        match mode {
            LockMode::Shared => &self.shared_tables,
            LockMode::Exclusive => &self.exclusive_tables,
            LockMode::IntentionShared => &self.intention_shared_tables,
            LockMode::IntentionExclusive => &self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &self.shared_intention_exclusive_tables,
        }
    }

    pub fn table_set_mut(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }

    pub fn row_set_mut(&mut self, mode: LockMode) -> &mut HashMap<TableOid, HashSet<Rid>> {
        match mode {
            LockMode::Shared => &mut self.shared_rows,
            LockMode::Exclusive => &mut self.exclusive_rows,
            _ => unreachable!("row locks are only ever S or X"),
        }
    }
}

/// An active transaction: id, isolation level, 2PL state and the lock sets
/// the lock manager maintains on its behalf.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    locks: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            locks: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Run `f` with mutable access to the lock sets.
    pub fn with_locks<R>(&self, f: impl FnOnce(&mut LockSets) -> R) -> R {
        f(&mut self.locks.lock())
    }

    /// The table lock mode this transaction holds on `oid`, if any.
    pub fn held_table_mode(&self, oid: TableOid) -> Option<LockMode> {
        let locks = self.locks.lock();
        for mode in [
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::Shared,
            LockMode::SharedIntentionExclusive,
            LockMode::Exclusive,
        ] {
            if locks.table_set(mode).contains(&oid) {
                return Some(mode);
            }
        }
        None
    }

    /// Whether any row lock is still held on `oid`.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let locks = self.locks.lock();
        locks.shared_rows.get(&oid).is_some_and(|s| !s.is_empty())
            || locks.exclusive_rows.get(&oid).is_some_and(|s| !s.is_empty())
    }

    /// Snapshot of held table locks as `(mode, oid)` pairs.
    pub fn table_locks(&self) -> Vec<(LockMode, TableOid)> {
        let locks = self.locks.lock();
        let mut out = Vec::new();
        for mode in [
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::Shared,
            LockMode::SharedIntentionExclusive,
            LockMode::Exclusive,
        ] {
            out.extend(locks.table_set(mode).iter().map(|&oid| (mode, oid)));
        }
        out
    }

    /// Snapshot of held row locks as `(mode, oid, rid)` triples.
    pub fn row_locks(&self) -> Vec<(LockMode, TableOid, Rid)> {
        let locks = self.locks.lock();
        let mut out = Vec::new();
        for (&oid, rids) in &locks.shared_rows {
            out.extend(rids.iter().map(|&rid| (LockMode::Shared, oid, rid)));
        }
        for (&oid, rids) in &locks.exclusive_rows {
            out.extend(rids.iter().map(|&rid| (LockMode::Exclusive, oid, rid)));
        }
        out
    }
}
