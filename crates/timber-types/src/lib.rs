//! Cross-cutting value types for the TimberDB storage engine.
//!
//! This crate defines the identifiers, time windows, and on-disk cell shapes
//! shared by the reconciliation path and its collaborators. Runtime machinery
//! (update chains, arenas, contexts) lives in `timber-rec`; only pure data
//! lives here.

pub mod cell;
pub mod ids;
pub mod time_window;
pub mod update;

pub use cell::{CellKind, DiskCell, PageKind};
pub use ids::{TimePair, Timestamp, TxnId};
pub use time_window::TimeWindow;
pub use update::{PrepareState, UpdateFlags, UpdateKind};
