//! Update selection and visibility resolution for page reconciliation.
//!
//! Reconciliation converts a page's in-memory state plus its update chains
//! into a new on-disk image. This crate implements the decision procedure at
//! its heart: for every logical key, which single update (if any) becomes
//! the new on-disk value, what validity window annotates it, whether the
//! remaining chain must be preserved for history-store spill or in-memory
//! restore, and whether the original on-disk value must be rematerialised so
//! older readers and later delta-resolving writers keep working.
//!
//! The core is pure with respect to I/O: it reads chains, consults the
//! [`visibility::VisibilityOracle`], and mutates only the
//! [`context::ReconcileContext`] and the chain tails it appends to. Page
//! formatting, history-store storage, and eviction policy are the caller's
//! business.

mod append;
pub mod chain;
pub mod context;
pub mod page;
pub mod select;
pub mod visibility;

pub use chain::{ChainIter, Update, UpdateArena, UpdateIdx, UpdateStore};
pub use context::{KeyRef, RecFlags, ReconcileContext, SavedUpdate, UpdateSelection};
pub use page::{InlinePayloadProvider, Page, PageProvider};
pub use select::upd_select;
pub use visibility::{TxnRegistry, VisibilityOracle};
