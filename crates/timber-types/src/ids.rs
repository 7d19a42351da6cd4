//! Transaction and timestamp identifiers.
//!
//! Both identifier spaces carry their sentinels in-band: reconciliation
//! orders updates by comparing raw 64-bit values, and the reserved values
//! partition the space so that the comparisons come out right without
//! special-casing. `TxnId::NONE` sorts below every real transaction and
//! `TxnId::ABORTED` above `TxnId::MAX`, mirroring the on-disk time window
//! defaults.

use std::fmt;

/// 64-bit commit/read timestamp.
///
/// `NONE` means no timestamp was ever assigned; `MAX` is an unbounded stop
/// bound. Everything in between is an application commit timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const NONE: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the unset sentinel.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => write!(f, "0"),
            Self::MAX => write!(f, "max"),
            Self(raw) => write!(f, "{raw}"),
        }
    }
}

/// 64-bit transaction identifier.
///
/// Domain: `FIRST..=MAX` for real transactions. `NONE` marks entries written
/// without a transaction (e.g. recovered values), `ABORTED` is stored into an
/// update's id slot when its transaction rolls back.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TxnId(u64);

impl TxnId {
    pub const NONE: Self = Self(0);
    pub const FIRST: Self = Self(1);
    /// Largest id a real transaction can carry; doubles as the unbounded
    /// stop sentinel in time windows.
    pub const MAX: Self = Self(u64::MAX - 10);
    pub const ABORTED: Self = Self(u64::MAX);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn is_aborted(self) -> bool {
        self.0 == Self::ABORTED.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => write!(f, "none"),
            Self::MAX => write!(f, "max"),
            Self::ABORTED => write!(f, "aborted"),
            Self(raw) => write!(f, "txn#{raw}"),
        }
    }
}

/// A `(timestamp, transaction id)` pair bounding one side of a time window.
///
/// The derived ordering is lexicographic on `(ts, txn)`: a reader's snapshot
/// position is compared against start and stop pairs with this order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TimePair {
    pub ts: Timestamp,
    pub txn: TxnId,
}

impl TimePair {
    #[inline]
    pub const fn new(ts: Timestamp, txn: TxnId) -> Self {
        Self { ts, txn }
    }
}

impl fmt::Display for TimePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ts, self.txn)
    }
}
