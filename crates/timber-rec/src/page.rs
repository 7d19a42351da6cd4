//! Minimal page model consumed by update selection.
//!
//! Reconciliation only needs a page's layout family, its per-slot chain
//! heads, and a byte counter to charge appended updates against; the real
//! page image and cell encoding live elsewhere.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use timber_error::{Result, TimberError};
use timber_types::{DiskCell, PageKind};

use crate::chain::UpdateIdx;

/// Packed slot value meaning "no update chain".
const SLOT_EMPTY: u64 = u64::MAX;

/// An in-memory page under reconciliation.
pub struct Page {
    kind: PageKind,
    history_store: bool,
    metadata: bool,
    slots: Vec<AtomicU64>,
    mem_size: AtomicUsize,
}

impl Page {
    #[must_use]
    pub fn new(kind: PageKind, nslots: usize) -> Self {
        Self {
            kind,
            history_store: false,
            metadata: false,
            slots: (0..nslots).map(|_| AtomicU64::new(SLOT_EMPTY)).collect(),
            mem_size: AtomicUsize::new(0),
        }
    }

    /// Builder: the page belongs to the history store tree; its entries are
    /// implicitly committed.
    #[must_use]
    pub fn with_history_store(mut self) -> Self {
        self.history_store = true;
        self
    }

    /// Builder: the page belongs to the metadata tree.
    #[must_use]
    pub fn with_metadata(mut self) -> Self {
        self.metadata = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> PageKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn is_history_store(&self) -> bool {
        self.history_store
    }

    #[inline]
    #[must_use]
    pub fn is_metadata(&self) -> bool {
        self.metadata
    }

    /// Chain head for a row-store slot, if any updates are pending.
    #[must_use]
    pub fn update_chain(&self, slot: usize) -> Option<UpdateIdx> {
        let raw = self.slots.get(slot)?.load(Ordering::Acquire);
        UpdateIdx::unpack(raw)
    }

    /// Install a chain head for a slot (driver/test plumbing).
    pub fn set_update_chain(&self, slot: usize, head: Option<UpdateIdx>) {
        let raw = head.map_or(SLOT_EMPTY, UpdateIdx::pack);
        self.slots[slot].store(raw, Ordering::Release);
    }

    /// Charge appended bytes against the page's in-memory footprint.
    pub fn mem_incr(&self, bytes: usize) {
        self.mem_size.fetch_add(bytes, Ordering::Relaxed);
    }

    #[must_use]
    pub fn mem_size(&self) -> usize {
        self.mem_size.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("kind", &self.kind)
            .field("history_store", &self.history_store)
            .field("metadata", &self.metadata)
            .field("slots", &self.slots.len())
            .field("mem_size", &self.mem_size())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PageProvider
// ---------------------------------------------------------------------------

/// Resolves cell payloads, following overflow blocks when necessary.
pub trait PageProvider {
    /// Copy out the full value bytes backing `cell`.
    fn cell_payload(&self, page: &Page, cell: &DiskCell) -> Result<Vec<u8>>;
}

/// Provider for pages whose cells are fully inline.
///
/// Overflow cells cannot be resolved here; a reconciliation driver wires in
/// a block-manager-backed provider for those.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePayloadProvider;

impl PageProvider for InlinePayloadProvider {
    fn cell_payload(&self, _page: &Page, cell: &DiskCell) -> Result<Vec<u8>> {
        if cell.overflow {
            return Err(TimberError::CellPayload {
                detail: "overflow cell has no inline payload".to_owned(),
            });
        }
        Ok(cell.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timber_types::TimeWindow;

    #[test]
    fn test_slot_chain_round_trip() {
        let page = Page::new(PageKind::RowLeaf, 4);
        assert_eq!(page.update_chain(0), None);
        assert_eq!(page.update_chain(99), None, "out-of-range slot is empty");

        let idx = UpdateIdx::new(0, 7);
        page.set_update_chain(2, Some(idx));
        assert_eq!(page.update_chain(2), Some(idx));

        page.set_update_chain(2, None);
        assert_eq!(page.update_chain(2), None);
    }

    #[test]
    fn test_mem_accounting() {
        let page = Page::new(PageKind::RowLeaf, 1);
        page.mem_incr(128);
        page.mem_incr(64);
        assert_eq!(page.mem_size(), 192);
    }

    #[test]
    fn test_inline_provider_rejects_overflow() {
        let page = Page::new(PageKind::RowLeaf, 1);
        let mut cell = DiskCell::value(TimeWindow::new(), b"v".to_vec());
        assert_eq!(
            InlinePayloadProvider.cell_payload(&page, &cell).unwrap(),
            b"v".to_vec()
        );

        cell.overflow = true;
        assert!(InlinePayloadProvider.cell_payload(&page, &cell).is_err());
    }
}
