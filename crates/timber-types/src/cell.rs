//! Unpacked on-disk cells and page kinds.

use crate::time_window::TimeWindow;

/// What an on-disk cell encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CellKind {
    /// A materialised value.
    Value,
    /// An explicit deleted record.
    Deleted,
}

/// An on-disk cell after unpacking.
///
/// `payload` holds the inline value bytes; for an overflow cell the bytes
/// live in separately-allocated blocks and must be fetched through the page
/// provider instead. The cell's prepared marker travels inside the window.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DiskCell {
    pub kind: CellKind,
    pub tw: TimeWindow,
    /// Payload stored in overflow blocks rather than on the page.
    pub overflow: bool,
    pub payload: Vec<u8>,
}

impl DiskCell {
    /// An inline value cell with the given window and bytes.
    #[must_use]
    pub fn value(tw: TimeWindow, payload: Vec<u8>) -> Self {
        Self {
            kind: CellKind::Value,
            tw,
            overflow: false,
            payload,
        }
    }
}

/// Physical layout family of a B-tree page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PageKind {
    /// Row-store leaf.
    RowLeaf,
    /// Variable-length column-store leaf.
    ColVar,
    /// Fixed-length column-store leaf; has no history-store support.
    ColFix,
}
