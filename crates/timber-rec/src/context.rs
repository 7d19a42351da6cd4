//! Per-reconciliation mutable state.
//!
//! One [`ReconcileContext`] lives for the duration of a reconciliation pass
//! over a page. It carries the mode flags, the watermarks raised while
//! chains are walked, and the list of update chains that must be preserved
//! for history-store spill or in-memory restore.

use smallvec::SmallVec;

use timber_types::{TimeWindow, Timestamp, TxnId};

use crate::chain::UpdateIdx;
use crate::visibility::VisibilityOracle;

bitflags::bitflags! {
    /// Reconciliation mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecFlags: u32 {
        /// Only globally visible updates may be written.
        const VISIBLE_ALL = 1 << 0;
        /// The pass runs on behalf of cache eviction.
        const EVICT = 1 << 1;
        /// The pass runs on behalf of a checkpoint.
        const CHECKPOINT = 1 << 2;
        /// Displaced versions may be spilled to the history store.
        const HS = 1 << 3;
        /// The database is in-memory; nothing can be spilled.
        const IN_MEMORY = 1 << 4;
        /// The caller requires the page to be clean afterwards.
        const CLEAN_AFTER_REC = 1 << 5;
        /// The caller asserts every update is visible; anything else is an
        /// invariant violation.
        const VISIBILITY_ERR = 1 << 6;
    }
}

/// Identifies the key a saved chain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRef {
    /// A skiplist insert entry; its chain head is carried directly and must
    /// exist.
    Insert(UpdateIdx),
    /// A row-store slot; the chain may be absent.
    Slot(usize),
}

/// An update chain that outlives this reconciliation: spilled to the history
/// store, or replayed into the new in-memory image when `restore` is set.
#[derive(Debug, Clone, Copy)]
pub struct SavedUpdate {
    pub key: KeyRef,
    /// The update written to the page image; `None` when the image encodes
    /// a delete directly.
    pub onpage_upd: Option<UpdateIdx>,
    pub restore: bool,
}

/// Result of update selection for one key.
#[derive(Debug, Clone, Copy)]
pub struct UpdateSelection {
    /// The update to write, or `None` to keep (or delete) the on-disk value.
    pub upd: Option<UpdateIdx>,
    /// Validity window annotating the written value; the prepared marker
    /// travels inside.
    pub tw: TimeWindow,
}

impl UpdateSelection {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            upd: None,
            tw: TimeWindow::new(),
        }
    }
}

impl Default for UpdateSelection {
    fn default() -> Self {
        Self::empty()
    }
}

/// Mutable state accumulated across all keys of one reconciliation pass.
#[derive(Debug)]
pub struct ReconcileContext {
    pub flags: RecFlags,
    /// Commit watermark cached when the pass started. The global commit
    /// point moves forward underneath a running reconciliation; all
    /// `VISIBLE_ALL` commit checks use this snapshot so a chain cannot be
    /// classified inconsistently mid-walk.
    last_running: TxnId,

    /// Newest transaction observed on the page.
    pub max_txn: TxnId,
    /// Newest start timestamp observed on the page.
    pub max_ts: Timestamp,
    /// Newest start timestamp among selected (written) updates.
    pub max_ondisk_ts: Timestamp,
    /// Oldest start timestamp among updates skipped as prepared; readers at
    /// or above it cannot rely on the page image alone.
    pub min_skipped_ts: Timestamp,

    pub updates_seen: u64,
    pub updates_unstable: u64,
    /// Out-of-order window repairs performed, for telemetry.
    pub oo_repairs: u64,

    /// Chains to preserve, in key order.
    pub supd: SmallVec<[SavedUpdate; 8]>,
    pub supd_memsize: usize,

    /// The page must stay dirty: not every update was written.
    pub leave_dirty: bool,
    /// At least one saved chain must be replayed into the new image.
    pub cache_write_restore: bool,
}

impl ReconcileContext {
    /// Capture a context for one pass; `last_running` is read from the
    /// oracle exactly once, here.
    #[must_use]
    pub fn new(flags: RecFlags, oracle: &dyn VisibilityOracle) -> Self {
        Self {
            flags,
            last_running: oracle.last_running(),
            max_txn: TxnId::NONE,
            max_ts: Timestamp::NONE,
            max_ondisk_ts: Timestamp::NONE,
            min_skipped_ts: Timestamp::MAX,
            updates_seen: 0,
            updates_unstable: 0,
            oo_repairs: 0,
            supd: SmallVec::new(),
            supd_memsize: 0,
            leave_dirty: false,
            cache_write_restore: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn last_running(&self) -> TxnId {
        self.last_running
    }

    /// Record a chain for later spill or restore.
    pub(crate) fn save_update(
        &mut self,
        key: KeyRef,
        onpage_upd: Option<UpdateIdx>,
        restore: bool,
        memsize: usize,
    ) {
        // If nothing was committed, the chain must be restored.
        debug_assert!(
            onpage_upd.is_some() || restore,
            "saved chain without an on-page update must be restored"
        );
        self.supd.push(SavedUpdate {
            key,
            onpage_upd,
            restore,
        });
        self.supd_memsize += memsize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::TxnRegistry;

    #[test]
    fn test_context_caches_last_running() {
        let reg = TxnRegistry::new();
        reg.set_last_running(TxnId::new(42));
        let ctx = ReconcileContext::new(RecFlags::VISIBLE_ALL, &reg);

        // Later movement of the global watermark must not be observed.
        reg.set_last_running(TxnId::new(99));
        assert_eq!(ctx.last_running(), TxnId::new(42));
    }

    #[test]
    fn test_initial_watermarks() {
        let reg = TxnRegistry::new();
        let ctx = ReconcileContext::new(RecFlags::empty(), &reg);
        assert_eq!(ctx.max_txn, TxnId::NONE);
        assert_eq!(ctx.max_ts, Timestamp::NONE);
        assert_eq!(ctx.max_ondisk_ts, Timestamp::NONE);
        assert_eq!(ctx.min_skipped_ts, Timestamp::MAX);
        assert!(ctx.supd.is_empty());
        assert!(!ctx.leave_dirty);
        assert!(!ctx.cache_write_restore);
    }

    #[test]
    fn test_save_update_accumulates_memsize() {
        let reg = TxnRegistry::new();
        let mut ctx = ReconcileContext::new(RecFlags::EVICT, &reg);
        ctx.save_update(KeyRef::Slot(0), None, true, 100);
        ctx.save_update(KeyRef::Slot(1), None, true, 50);
        assert_eq!(ctx.supd.len(), 2);
        assert_eq!(ctx.supd_memsize, 150);
    }
}
