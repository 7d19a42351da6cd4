//! Transaction visibility: the oracle consumed by update selection.
//!
//! Selection never inspects global transaction state directly; it asks the
//! oracle three questions (globally visible, visible to the reconciliation's
//! snapshot, committed) and otherwise relies on the `last_running` watermark
//! cached on the reconcile context. [`TxnRegistry`] is a reference
//! implementation backing the in-crate tests; an engine embeds its own
//! transaction manager behind the same trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use timber_types::{Timestamp, TxnId};

use crate::context::RecFlags;

/// Queries over global transaction state, all pure with respect to the
/// caller.
pub trait VisibilityOracle {
    /// Oldest transaction id that was not yet committed when the current
    /// reconciliation started.
    fn last_running(&self) -> TxnId;

    /// Id of the running checkpoint transaction, or `TxnId::NONE`.
    fn checkpoint_txn_id(&self) -> TxnId;

    /// Whether `txn` has committed (not merely "not aborted").
    fn committed(&self, txn: TxnId) -> bool;

    /// Whether every active reader across the system is guaranteed to see
    /// an entry written by `txn` at `ts`.
    fn visible_all(&self, txn: TxnId, ts: Timestamp) -> bool;

    /// Whether an entry written by `txn` at `ts` is visible under the
    /// current reconciliation's snapshot. Pass `Timestamp::NONE` to ask
    /// about the transaction id alone.
    fn visible_to_snapshot(&self, txn: TxnId, ts: Timestamp) -> bool;
}

/// Whether an update is stable: no future reader can need an older version.
///
/// Under `VISIBLE_ALL` that means globally visible; otherwise visibility
/// under the reconciliation's own snapshot is enough.
pub(crate) fn update_stable(
    flags: RecFlags,
    oracle: &dyn VisibilityOracle,
    txn: TxnId,
    start_ts: Timestamp,
) -> bool {
    if flags.contains(RecFlags::VISIBLE_ALL) {
        oracle.visible_all(txn, start_ts)
    } else {
        oracle.visible_to_snapshot(txn, start_ts)
    }
}

// ---------------------------------------------------------------------------
// TxnRegistry
// ---------------------------------------------------------------------------

/// Lifecycle state of a registered transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    Running,
    Committed,
    Aborted,
}

/// Reference oracle: a table of transaction states plus the global
/// watermarks visibility is judged against.
///
/// Ids below `oldest_id` with no explicit entry are treated as committed;
/// that mirrors a transaction table that prunes resolved entries once no
/// reader can care.
#[derive(Debug)]
pub struct TxnRegistry {
    states: Mutex<HashMap<u64, TxnStatus>>,
    /// All ids strictly below this are committed and visible to every reader.
    oldest_id: AtomicU64,
    /// Ids at or above this were still running when reconciliation started.
    last_running: AtomicU64,
    /// Oldest timestamp any current or future reader can pin.
    pinned_ts: AtomicU64,
    /// Snapshot upper bound (exclusive) for the reconciling session.
    snapshot_max: AtomicU64,
    /// Read timestamp of the reconciling session's snapshot.
    read_ts: AtomicU64,
    checkpoint_txn: AtomicU64,
}

impl TxnRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            oldest_id: AtomicU64::new(TxnId::FIRST.get()),
            last_running: AtomicU64::new(TxnId::MAX.get()),
            pinned_ts: AtomicU64::new(Timestamp::MAX.get()),
            snapshot_max: AtomicU64::new(TxnId::MAX.get()),
            read_ts: AtomicU64::new(Timestamp::MAX.get()),
            checkpoint_txn: AtomicU64::new(TxnId::NONE.get()),
        }
    }

    pub fn begin(&self, txn: TxnId) {
        self.states.lock().insert(txn.get(), TxnStatus::Running);
    }

    pub fn commit(&self, txn: TxnId) {
        self.states.lock().insert(txn.get(), TxnStatus::Committed);
    }

    pub fn rollback(&self, txn: TxnId) {
        self.states.lock().insert(txn.get(), TxnStatus::Aborted);
    }

    pub fn set_oldest_id(&self, txn: TxnId) {
        self.oldest_id.store(txn.get(), Ordering::Release);
    }

    pub fn set_last_running(&self, txn: TxnId) {
        self.last_running.store(txn.get(), Ordering::Release);
    }

    pub fn set_pinned_ts(&self, ts: Timestamp) {
        self.pinned_ts.store(ts.get(), Ordering::Release);
    }

    pub fn set_snapshot_max(&self, txn: TxnId) {
        self.snapshot_max.store(txn.get(), Ordering::Release);
    }

    pub fn set_read_ts(&self, ts: Timestamp) {
        self.read_ts.store(ts.get(), Ordering::Release);
    }

    pub fn set_checkpoint_txn(&self, txn: TxnId) {
        self.checkpoint_txn.store(txn.get(), Ordering::Release);
    }
}

impl Default for TxnRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityOracle for TxnRegistry {
    fn last_running(&self) -> TxnId {
        TxnId::new(self.last_running.load(Ordering::Acquire))
    }

    fn checkpoint_txn_id(&self) -> TxnId {
        TxnId::new(self.checkpoint_txn.load(Ordering::Acquire))
    }

    fn committed(&self, txn: TxnId) -> bool {
        if txn.is_none() {
            return true;
        }
        if txn.is_aborted() {
            return false;
        }
        match self.states.lock().get(&txn.get()) {
            Some(status) => *status == TxnStatus::Committed,
            // Resolved entries below the oldest id may have been pruned.
            None => txn.get() < self.oldest_id.load(Ordering::Acquire),
        }
    }

    fn visible_all(&self, txn: TxnId, ts: Timestamp) -> bool {
        let id_visible = txn.is_none() || txn.get() < self.oldest_id.load(Ordering::Acquire);
        id_visible && (ts.is_none() || ts.get() <= self.pinned_ts.load(Ordering::Acquire))
    }

    fn visible_to_snapshot(&self, txn: TxnId, ts: Timestamp) -> bool {
        if !ts.is_none() && ts.get() > self.read_ts.load(Ordering::Acquire) {
            return false;
        }
        if txn.is_none() {
            return true;
        }
        txn.get() < self.snapshot_max.load(Ordering::Acquire) && self.committed(txn)
    }
}
