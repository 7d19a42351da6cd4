//! Update selection: which update (if any) becomes the new on-disk value.
//!
//! One call per logical key being reconciled. The walk classifies each chain
//! entry against the reconciliation's cached commit watermark, picks the
//! newest committed update that can be written, composes its validity
//! window, and decides whether the remaining chain must be preserved and
//! whether the original on-disk value must be rematerialised.

use timber_error::{Result, TimberError};
use timber_types::{CellKind, DiskCell, PageKind, PrepareState, Timestamp, TxnId, UpdateKind};

use crate::append::append_orig_value;
use crate::chain::{UpdateIdx, UpdateStore};
use crate::context::{KeyRef, RecFlags, ReconcileContext, UpdateSelection};
use crate::page::{Page, PageProvider};
use crate::visibility::{update_stable, VisibilityOracle};

/// Whether the chain recorded for this key must be preserved.
fn need_save_upd(
    ctx: &ReconcileContext,
    page: &Page,
    oracle: &dyn VisibilityOracle,
    sel: &UpdateSelection,
    has_newer_updates: bool,
) -> bool {
    if sel.tw.prepare {
        return true;
    }

    if ctx.flags.contains(RecFlags::EVICT) && has_newer_updates {
        return true;
    }

    // Without a history store (and excepting fixed-length column stores,
    // which restore in memory), there is nowhere to put a saved chain.
    if !ctx.flags.intersects(RecFlags::HS | RecFlags::IN_MEMORY)
        && page.kind() != PageKind::ColFix
    {
        return false;
    }

    // In a checkpoint with no on-page value selected there is nothing a
    // saved chain would annotate.
    if ctx.flags.contains(RecFlags::CHECKPOINT) && sel.upd.is_none() {
        return false;
    }

    !oracle.visible_all(sel.tw.stop_txn, sel.tw.stop_ts)
        && !oracle.visible_all(sel.tw.start_txn, sel.tw.start_ts)
}

/// Select the update to write for one key, filling the validity window and
/// recording side effects on `ctx` and the chain.
///
/// Returns `TimberError::Busy` when a committed selection would strand
/// uncommitted successors (they cannot be moved to the history store), or
/// when the caller demanded a clean page and invisible updates remain.
/// Returns `TimberError::Panic` when the caller asserted full visibility
/// and an invisible update was found.
#[allow(clippy::too_many_lines)]
pub fn upd_select(
    ctx: &mut ReconcileContext,
    page: &Page,
    provider: &dyn PageProvider,
    oracle: &dyn VisibilityOracle,
    store: &UpdateStore,
    key: KeyRef,
    cell: Option<&DiskCell>,
) -> Result<UpdateSelection> {
    let mut sel = UpdateSelection::empty();

    // An insert entry carries its chain directly (and must have one); a
    // row-store slot may have no pending updates at all.
    let first_upd = match key {
        KeyRef::Insert(head) => head,
        KeyRef::Slot(slot) => match page.update_chain(slot) {
            Some(head) => head,
            None => return Ok(sel),
        },
    };

    let is_hs_page = page.is_history_store();
    let evict = ctx.flags.contains(RecFlags::EVICT);

    let mut first_txn_upd: Option<UpdateIdx> = None;
    let mut has_newer_updates = false;
    let mut max_txn = TxnId::NONE;
    let mut max_ts = Timestamp::NONE;
    let mut upd_memsize = 0_usize;
    let mut selected: Option<UpdateIdx> = None;
    let mut selected_txn = TxnId::NONE;

    {
        let arena = store.read();
        for (idx, upd) in arena.iter_chain(first_upd) {
            let txn_id = upd.txn_id();
            if txn_id.is_aborted() {
                continue;
            }

            ctx.updates_seen += 1;
            upd_memsize += upd.memsize();

            if first_txn_upd.is_none() {
                first_txn_upd = Some(idx);
            }
            if max_txn < txn_id {
                max_txn = txn_id;
            }

            // Commit check. The global commit point can move forward during
            // reconciliation, so under VISIBLE_ALL the context's cached
            // watermark decides; otherwise the reconciliation's own snapshot
            // does. History store entries are implicitly committed.
            let uncommitted = if ctx.flags.contains(RecFlags::VISIBLE_ALL) {
                ctx.last_running() <= txn_id
            } else {
                !oracle.visible_to_snapshot(txn_id, Timestamp::NONE)
            };
            if !is_hs_page && uncommitted {
                // Rare: under low isolation levels eviction can see a
                // committed update followed by uncommitted ones. Give up;
                // uncommitted updates cannot move to the history store.
                if selected.is_some() {
                    return Err(TimberError::Busy);
                }
                has_newer_updates = true;
                continue;
            }

            let prepare = upd.prepare_state();
            if prepare.is_unresolved() {
                debug_assert!(
                    selected.is_none() || selected_txn == txn_id,
                    "a prepared update below a selection must share its transaction"
                );
                if !evict {
                    has_newer_updates = true;
                    if upd.start_ts() > max_ts {
                        max_ts = upd.start_ts();
                    }
                    // Readers consult the page image at their read timestamp,
                    // so the skipped watermark uses the start timestamp, not
                    // the durable one.
                    if upd.start_ts() < ctx.min_skipped_ts {
                        ctx.min_skipped_ts = upd.start_ts();
                    }
                    continue;
                }
                debug_assert_eq!(
                    prepare,
                    PrepareState::InProgress,
                    "eviction may only select an in-progress prepared update"
                );
            }

            if upd.start_ts() > max_ts {
                max_ts = upd.start_ts();
            }

            // The newest committed update is written to disk.
            if selected.is_none() {
                selected = Some(idx);
                selected_txn = txn_id;
            }

            if evict && !update_stable(ctx.flags, oracle, txn_id, upd.start_ts()) {
                ctx.updates_unstable += 1;
            } else if !evict {
                break;
            }
        }

        if let Some(sel_idx) = selected {
            let upd = arena.get(sel_idx).expect("selected update must resolve");
            debug_assert!(
                !upd.txn_id().is_aborted() && upd.kind() != UpdateKind::Reserve,
                "selection must be a live, writable-class update"
            );
            // Metadata updates from the checkpoint transaction must never be
            // written by a concurrent reconciliation.
            debug_assert!(
                !page.is_metadata()
                    || upd.txn_id().is_none()
                    || upd.txn_id() != oracle.checkpoint_txn_id()
                    || ctx.flags.contains(RecFlags::CHECKPOINT),
                "checkpoint-transaction metadata update selected outside checkpoint"
            );
        }
    }

    // Every entry was aborted.
    if first_txn_upd.is_none() {
        debug_assert!(selected.is_none());
        return Ok(sel);
    }

    // The caller expects the page to be clean afterwards; invisible updates
    // make that impossible.
    if has_newer_updates
        && ctx
            .flags
            .intersects(RecFlags::CLEAN_AFTER_REC | RecFlags::VISIBILITY_ERR)
    {
        if ctx.flags.contains(RecFlags::VISIBILITY_ERR) {
            return Err(TimberError::panic("reconciliation error, update not visible"));
        }
        return Err(TimberError::Busy);
    }

    if let Some(sel_idx) = selected {
        let arena = store.read();
        let upd = arena.get(sel_idx).expect("selected update must resolve");
        if upd.start_ts() > ctx.max_ondisk_ts {
            ctx.max_ondisk_ts = upd.start_ts();
        }
    }

    // Compose the validity window. The start comes from the selected update;
    // the stop is set when a tombstone ends the value's validity. A
    // tombstone is never written itself, so when the newest committed update
    // is one, the selection moves to the update it applies to.
    sel.upd = selected;
    let mut tombstone: Option<UpdateIdx> = None;
    let mut last_upd: Option<UpdateIdx> = None;
    if let Some(first_sel) = selected {
        {
            let arena = store.read();
            let first = arena.get(first_sel).expect("selected update must resolve");

            // Tombstones are never returned to write, so record the prepared
            // marker before moving to the previous update.
            if first.prepare_state() == PrepareState::InProgress {
                sel.tw.prepare = true;
            }

            if first.kind() == UpdateKind::Tombstone {
                sel.tw
                    .set_stop(first.txn_id(), first.start_ts(), first.durable_ts());
                tombstone = Some(first_sel);

                // A globally visible tombstone means no reader can need the
                // value it removed; otherwise find the update it applies to.
                if !oracle.visible_all(first.txn_id(), first.start_ts()) {
                    let mut cur_idx = first_sel;
                    loop {
                        let cur = arena.get(cur_idx).expect("chain link must resolve");
                        match cur.next() {
                            Some(next)
                                if arena
                                    .get(next)
                                    .expect("chain link must resolve")
                                    .txn_id()
                                    .is_aborted() =>
                            {
                                cur_idx = next;
                            }
                            _ => break,
                        }
                    }
                    let cur = arena.get(cur_idx).expect("chain link must resolve");
                    if cur.next().is_none() {
                        last_upd = Some(cur_idx);
                    }
                    sel.upd = cur.next();
                }
            }

            if let Some(live) = sel.upd {
                let upd = arena.get(live).expect("chain link must resolve");
                sel.tw
                    .set_start(upd.txn_id(), upd.start_ts(), upd.durable_ts());
            }
        }

        if sel.upd.is_none()
            && (sel.tw.stop_ts != Timestamp::NONE || sel.tw.stop_txn != TxnId::NONE)
        {
            // Only a tombstone remains in memory: reconciling with a single
            // update, evicting, and deleting on the reread page produces
            // exactly this shape. Keep the on-disk value, bounded by the
            // tombstone's stop, and rematerialise it at the chain tail.
            assert!(
                cell.is_some() && tombstone.is_some(),
                "tombstone-only chain requires an on-disk value"
            );
            let vcell = cell.expect("checked above");
            append_orig_value(
                page,
                provider,
                oracle,
                store,
                tombstone.expect("checked above"),
                vcell,
            )?;

            let arena = store.read();
            let tail = last_upd.expect("tombstone-only chain has a tail");
            let appended = arena
                .get(tail)
                .expect("chain tail must resolve")
                .next()
                .expect("append must link the on-disk value");
            let upd = arena.get(appended).expect("appended update must resolve");
            debug_assert!(
                upd.kind() == UpdateKind::Standard
                    && upd.txn_id() == vcell.tw.start_txn
                    && upd.start_ts() == vcell.tw.start_ts
                    && upd.next().is_none(),
                "appended entry must mirror the cell start pair and end the chain"
            );
            sel.upd = Some(appended);
            sel.tw
                .set_start(upd.txn_id(), upd.start_ts(), upd.durable_ts());
        }
    }

    // An application that commits deletes behind inserts produces a stop
    // that sorts before its start. Hide the value rather than reject it;
    // older readers are not guaranteed to keep seeing content removed by
    // out-of-order commits.
    if sel.tw.is_out_of_order() {
        tracing::debug!(
            window = %sel.tw,
            "fixing out-of-order timestamps: remove committed earlier than value"
        );
        sel.tw.repair_out_of_order();
        ctx.oo_repairs += 1;
    }

    // The page-wide watermarks feed checkpoint decisions at the end of the
    // reconciliation pass.
    if ctx.max_txn < max_txn {
        ctx.max_txn = max_txn;
    }
    if max_ts > ctx.max_ts {
        ctx.max_ts = max_ts;
    }
    if has_newer_updates {
        ctx.leave_dirty = true;
    }

    let mut upd_saved = false;
    if need_save_upd(ctx, page, oracle, &sel, has_newer_updates) {
        // The chain is replayed into the new image when eviction holds
        // newer updates, or when there is no history store to spill to.
        let supd_restore = evict
            && (has_newer_updates
                || ctx.flags.contains(RecFlags::IN_MEMORY)
                || page.kind() == PageKind::ColFix);
        if supd_restore {
            ctx.cache_write_restore = true;
        }

        // A tombstone selection is encoded in the page image directly; the
        // save entry carries no on-page reference then.
        let onpage_upd = match sel.upd {
            Some(idx) => {
                let arena = store.read();
                let upd = arena.get(idx).expect("selected update must resolve");
                if upd.kind() == UpdateKind::Tombstone {
                    None
                } else {
                    debug_assert!(
                        upd.kind().is_writable(),
                        "on-page reference must be standard or modify"
                    );
                    Some(idx)
                }
            }
            None => None,
        };
        ctx.save_update(key, onpage_upd, supd_restore, upd_memsize);
        upd_saved = true;
    }

    // Paranoia: the choice must not have been rolled back underneath us.
    #[cfg(debug_assertions)]
    if let Some(idx) = sel.upd {
        let arena = store.read();
        debug_assert!(
            !arena
                .get(idx)
                .expect("selected update must resolve")
                .txn_id()
                .is_aborted(),
            "selected update was rolled back mid-reconciliation"
        );
    }

    // Writing a different value can strand the original: readers of a saved
    // chain may still need it, and an overflow cell's backing blocks are
    // reclaimed by the checkpoint that writes this page, so future readers
    // could not find them either way.
    if let (Some(sel_idx), Some(vcell)) = (sel.upd, cell) {
        if vcell.kind != CellKind::Deleted && (upd_saved || vcell.overflow) {
            append_orig_value(page, provider, oracle, store, sel_idx, vcell)?;
        }
    }

    Ok(sel)
}
