//! Rematerialising the on-disk value at the tail of an update chain.
//!
//! When reconciliation is about to replace a key's on-disk value, readers
//! positioned before the replacement (and later writers resolving deltas)
//! may still need the original. This module appends it to the chain as an
//! ordinary standard update, preceded by a tombstone when the cell carries a
//! finite stop bound, so that the chain remains a complete history.

use timber_error::Result;
use timber_types::{CellKind, DiskCell, UpdateFlags, UpdateKind};

use crate::chain::{Update, UpdateIdx, UpdateStore};
use crate::page::{Page, PageProvider};
use crate::visibility::VisibilityOracle;

/// Outcome of scanning the chain for conditions that make the append
/// unnecessary.
enum Scan {
    /// The on-disk value is already represented; nothing to do.
    Skip,
    /// Append after `tail`; `oldest_live` is the oldest non-aborted entry.
    Append {
        tail: UpdateIdx,
        oldest_live: UpdateIdx,
    },
}

/// Append the key's original on-disk value to its update chain, unless the
/// chain already represents it.
///
/// Walks from `from` to the physical tail. The skip checks run per entry:
/// out-of-order commits can place a globally visible update above one that
/// is not yet globally visible, so testing only the oldest entry would be
/// wrong.
pub(crate) fn append_orig_value(
    page: &Page,
    provider: &dyn PageProvider,
    oracle: &dyn VisibilityOracle,
    store: &UpdateStore,
    from: UpdateIdx,
    cell: &DiskCell,
) -> Result<()> {
    debug_assert!(
        cell.kind != CellKind::Deleted,
        "a deleted cell has no value to append"
    );

    let scan = {
        let arena = store.read();
        let mut oldest_live: Option<UpdateIdx> = None;
        let mut idx = from;
        loop {
            let upd = arena.get(idx).expect("chain link must resolve");
            let txn_id = upd.txn_id();

            // The chain was reconstructed for rollback-to-stable; the
            // original is already represented.
            if upd.flags().contains(UpdateFlags::RESTORED_FROM_HS) {
                break Scan::Skip;
            }

            // A prepared on-disk record is still in the update list; only a
            // tombstone on top still needs the original below it.
            if cell.tw.prepare && upd.kind() != UpdateKind::Tombstone {
                break Scan::Skip;
            }

            // The on-page value already appears on the chain. No equivalent
            // short-circuit exists for the stop pair: a chain holding only
            // the tombstone still needs the value appended.
            if cell.tw.start_ts == upd.start_ts()
                && cell.tw.start_txn == txn_id
                && upd.kind() != UpdateKind::Tombstone
            {
                break Scan::Skip;
            }

            // A globally visible self-contained update satisfies every
            // older reader.
            if upd.kind().is_self_contained() && oracle.visible_all(txn_id, upd.start_ts()) {
                break Scan::Skip;
            }

            if !txn_id.is_aborted() {
                oldest_live = Some(idx);
            }

            match upd.next() {
                Some(next) => idx = next,
                None => {
                    break Scan::Append {
                        tail: idx,
                        oldest_live: oldest_live
                            .expect("walking from a live update implies a live entry"),
                    }
                }
            }
        }
    };

    let Scan::Append { tail, oldest_live } = scan else {
        return Ok(());
    };

    // The value was universally superseded; no reader can get back to it.
    if cell.tw.has_stop() && oracle.visible_all(cell.tw.stop_txn, cell.tw.stop_ts) {
        return Ok(());
    }

    // Some reader needs the original value: copy it out of the cell.
    let payload = provider.cell_payload(page, cell)?;

    let mut total_size = 0;
    let (append_idx, size) = store.alloc(Update::standard(
        cell.tw.start_txn,
        cell.tw.start_ts,
        cell.tw.durable_start_ts,
        payload,
    ))?;
    total_size += size;

    // A finite stop bound needs a tombstone ahead of the value, so readers
    // between the delete and any re-insert see "not found". Skip it if the
    // chain already ends in one.
    let mut head_idx = append_idx;
    if cell.tw.has_stop() {
        let oldest_is_tombstone = {
            let arena = store.read();
            arena
                .get(oldest_live)
                .expect("oldest live entry must resolve")
                .kind()
                == UpdateKind::Tombstone
        };
        if oldest_is_tombstone {
            // Prepare resolution replaces the prepare timestamp with commit
            // and durable timestamps, so skip the comparison for a prepared
            // on-disk record.
            #[cfg(debug_assertions)]
            {
                let arena = store.read();
                let oldest = arena.get(oldest_live).expect("oldest live entry must resolve");
                debug_assert!(
                    cell.tw.prepare
                        || (cell.tw.stop_ts == oldest.start_ts()
                            && cell.tw.stop_txn == oldest.txn_id()),
                    "chain tombstone must carry the cell's stop pair"
                );
            }
        } else {
            let tombstone = Update::tombstone(
                cell.tw.stop_txn,
                cell.tw.stop_ts,
                cell.tw.durable_stop_ts,
            );
            tombstone.link_next(append_idx);
            match store.alloc(tombstone) {
                Ok((idx, size)) => {
                    total_size += size;
                    head_idx = idx;
                }
                Err(err) => {
                    store.free(append_idx);
                    return Err(err);
                }
            }
        }
    }

    // Publish the subchain with a single release store; the new entries are
    // fully initialised before they become reachable.
    {
        let arena = store.read();
        let tail_upd = arena.get(tail).expect("chain tail must resolve");
        debug_assert!(
            tail_upd.next().is_none(),
            "only the reconciling worker appends to the chain"
        );
        tail_upd.publish_next(head_idx);
    }

    page.mem_incr(total_size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::InlinePayloadProvider;
    use crate::visibility::TxnRegistry;
    use timber_types::{PageKind, TimeWindow, Timestamp, TxnId};

    fn ts(raw: u64) -> Timestamp {
        Timestamp::new(raw)
    }

    fn txn(raw: u64) -> TxnId {
        TxnId::new(raw)
    }

    fn cell_with(start_txn: u64, start_ts: u64) -> DiskCell {
        let mut tw = TimeWindow::new();
        tw.set_start(txn(start_txn), ts(start_ts), ts(start_ts));
        DiskCell::value(tw, b"ondisk".to_vec())
    }

    fn chain_kinds(store: &UpdateStore, head: UpdateIdx) -> Vec<UpdateKind> {
        store
            .read()
            .iter_chain(head)
            .map(|(_, u)| u.kind())
            .collect()
    }

    #[test]
    fn test_appends_standard_from_cell() {
        let store = UpdateStore::new();
        let page = Page::new(PageKind::RowLeaf, 1);
        let reg = TxnRegistry::new();
        let head = store
            .build_chain(vec![Update::standard(txn(12), ts(60), ts(60), vec![1])])
            .unwrap()
            .unwrap();

        let cell = cell_with(3, 20);
        append_orig_value(&page, &InlinePayloadProvider, &reg, &store, head, &cell).unwrap();

        let arena = store.read();
        let (_, appended) = arena.iter_chain(head).last().unwrap();
        assert_eq!(appended.kind(), UpdateKind::Standard);
        assert_eq!(appended.txn_id(), txn(3));
        assert_eq!(appended.start_ts(), ts(20));
        assert_eq!(appended.payload(), Some(&b"ondisk"[..]));
        assert!(page.mem_size() > 0, "appended bytes are accounted");
    }

    #[test]
    fn test_skips_when_start_pair_already_on_chain() {
        let store = UpdateStore::new();
        let page = Page::new(PageKind::RowLeaf, 1);
        let reg = TxnRegistry::new();
        let head = store
            .build_chain(vec![Update::standard(txn(3), ts(20), ts(20), vec![1])])
            .unwrap()
            .unwrap();

        let cell = cell_with(3, 20);
        append_orig_value(&page, &InlinePayloadProvider, &reg, &store, head, &cell).unwrap();
        assert_eq!(chain_kinds(&store, head).len(), 1, "no append");
        assert_eq!(page.mem_size(), 0);
    }

    #[test]
    fn test_skips_when_restored_from_history() {
        let store = UpdateStore::new();
        let page = Page::new(PageKind::RowLeaf, 1);
        let reg = TxnRegistry::new();
        let head = store
            .build_chain(vec![Update::standard(txn(5), ts(30), ts(30), vec![1])
                .with_flags(UpdateFlags::RESTORED_FROM_HS)])
            .unwrap()
            .unwrap();

        append_orig_value(
            &page,
            &InlinePayloadProvider,
            &reg,
            &store,
            head,
            &cell_with(3, 20),
        )
        .unwrap();
        assert_eq!(chain_kinds(&store, head).len(), 1);
    }

    #[test]
    fn test_skips_when_globally_visible_self_contained_exists() {
        let store = UpdateStore::new();
        let page = Page::new(PageKind::RowLeaf, 1);
        let reg = TxnRegistry::new();
        reg.set_oldest_id(txn(10));
        reg.set_pinned_ts(ts(100));

        // Newer not-yet-globally-visible update above a globally visible one:
        // the visible one already satisfies every older reader.
        let head = store
            .build_chain(vec![
                Update::standard(txn(12), ts(60), ts(60), vec![1]),
                Update::standard(txn(5), ts(30), ts(30), vec![2]),
            ])
            .unwrap()
            .unwrap();

        append_orig_value(
            &page,
            &InlinePayloadProvider,
            &reg,
            &store,
            head,
            &cell_with(3, 20),
        )
        .unwrap();
        assert_eq!(chain_kinds(&store, head).len(), 2);
    }

    #[test]
    fn test_modify_is_not_self_contained() {
        let store = UpdateStore::new();
        let page = Page::new(PageKind::RowLeaf, 1);
        let reg = TxnRegistry::new();
        reg.set_oldest_id(txn(10));
        reg.set_pinned_ts(ts(100));

        // A globally visible modify cannot satisfy older readers by itself.
        let head = store
            .build_chain(vec![Update::modify(txn(5), ts(30), ts(30), vec![2])])
            .unwrap()
            .unwrap();

        append_orig_value(
            &page,
            &InlinePayloadProvider,
            &reg,
            &store,
            head,
            &cell_with(3, 20),
        )
        .unwrap();
        assert_eq!(
            chain_kinds(&store, head),
            vec![UpdateKind::Modify, UpdateKind::Standard]
        );
    }

    #[test]
    fn test_prepends_tombstone_for_finite_stop() {
        let store = UpdateStore::new();
        let page = Page::new(PageKind::RowLeaf, 1);
        let reg = TxnRegistry::new();
        let head = store
            .build_chain(vec![Update::standard(txn(12), ts(60), ts(60), vec![1])])
            .unwrap()
            .unwrap();

        // Insert at 10, deleted at 20, re-inserted later: the tombstone must
        // tell readers there is no value between 20 and 60.
        let mut tw = TimeWindow::new();
        tw.set_start(txn(2), ts(10), ts(10));
        tw.set_stop(txn(4), ts(20), ts(20));
        let cell = DiskCell::value(tw, b"old".to_vec());

        append_orig_value(&page, &InlinePayloadProvider, &reg, &store, head, &cell).unwrap();

        assert_eq!(
            chain_kinds(&store, head),
            vec![
                UpdateKind::Standard,
                UpdateKind::Tombstone,
                UpdateKind::Standard
            ]
        );
        let arena = store.read();
        let (_, tomb) = arena.iter_chain(head).nth(1).unwrap();
        assert_eq!(tomb.txn_id(), txn(4));
        assert_eq!(tomb.start_ts(), ts(20));
    }

    #[test]
    fn test_no_tombstone_when_stop_globally_visible() {
        let store = UpdateStore::new();
        let page = Page::new(PageKind::RowLeaf, 1);
        let reg = TxnRegistry::new();
        reg.set_oldest_id(txn(50));
        reg.set_pinned_ts(ts(100));

        let head = store
            .build_chain(vec![Update::standard(txn(60), ts(99), ts(99), vec![1])])
            .unwrap()
            .unwrap();

        // Stop pair (20, 4) is globally visible: universally superseded.
        let mut tw = TimeWindow::new();
        tw.set_start(txn(2), ts(10), ts(10));
        tw.set_stop(txn(4), ts(20), ts(20));
        let cell = DiskCell::value(tw, b"old".to_vec());

        append_orig_value(&page, &InlinePayloadProvider, &reg, &store, head, &cell).unwrap();
        assert_eq!(chain_kinds(&store, head).len(), 1, "no append at all");
    }
}
