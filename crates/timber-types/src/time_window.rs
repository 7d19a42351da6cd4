//! Validity time windows.
//!
//! A time window bounds the interval during which an on-disk value is
//! visible: readers whose snapshot position `(ts, txn)` lies in
//! `[start, stop)` under the lexicographic pair order see the value.

use std::fmt;

use crate::ids::{TimePair, Timestamp, TxnId};

/// Six-field validity window plus the prepared marker.
///
/// Defaults describe a value that has always existed and is never superseded:
/// `start = (NONE, NONE)`, `stop = (MAX, MAX)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TimeWindow {
    pub start_ts: Timestamp,
    pub start_txn: TxnId,
    pub durable_start_ts: Timestamp,
    pub stop_ts: Timestamp,
    pub stop_txn: TxnId,
    pub durable_stop_ts: Timestamp,
    /// The bounding update belongs to an unresolved prepared transaction.
    pub prepare: bool,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeWindow {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start_ts: Timestamp::NONE,
            start_txn: TxnId::NONE,
            durable_start_ts: Timestamp::NONE,
            stop_ts: Timestamp::MAX,
            stop_txn: TxnId::MAX,
            durable_stop_ts: Timestamp::NONE,
            prepare: false,
        }
    }

    /// Set the window start from the update that begins the value's validity.
    #[inline]
    pub fn set_start(&mut self, txn: TxnId, ts: Timestamp, durable_ts: Timestamp) {
        self.start_txn = txn;
        self.start_ts = ts;
        self.durable_start_ts = durable_ts;
    }

    /// Set the window stop from the tombstone that ends the value's validity.
    ///
    /// The tombstone's own start fields become the stop bound of the value it
    /// deletes.
    #[inline]
    pub fn set_stop(&mut self, txn: TxnId, ts: Timestamp, durable_ts: Timestamp) {
        self.stop_txn = txn;
        self.stop_ts = ts;
        self.durable_stop_ts = durable_ts;
    }

    #[inline]
    #[must_use]
    pub const fn start_pair(&self) -> TimePair {
        TimePair::new(self.start_ts, self.start_txn)
    }

    #[inline]
    #[must_use]
    pub const fn stop_pair(&self) -> TimePair {
        TimePair::new(self.stop_ts, self.stop_txn)
    }

    /// Whether the stop bound is anything other than "never superseded".
    #[inline]
    #[must_use]
    pub fn has_stop(&self) -> bool {
        self.stop_ts != Timestamp::MAX || self.stop_txn != TxnId::MAX
    }

    /// Whether the stop bound sorts strictly before the start bound.
    ///
    /// Equal start and stop pairs are permitted: a single transaction may
    /// insert and then remove a record.
    #[inline]
    #[must_use]
    pub fn is_out_of_order(&self) -> bool {
        self.stop_pair() < self.start_pair()
    }

    /// Collapse the start onto the stop, producing an empty window.
    ///
    /// Applied when an application committed a delete with an older timestamp
    /// than the value it removes; the value is silently hidden rather than
    /// rejected. Returns whether a repair happened.
    pub fn repair_out_of_order(&mut self) -> bool {
        if !self.is_out_of_order() {
            return false;
        }
        self.durable_start_ts = self.durable_stop_ts;
        self.start_ts = self.stop_ts;
        self.start_txn = self.stop_txn;
        true
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "start={} durable={} stop={} durable={}",
            self.start_pair(),
            self.durable_start_ts,
            self.stop_pair(),
            self.durable_stop_ts,
        )?;
        if self.prepare {
            write!(f, " prepared")?;
        }
        Ok(())
    }
}
