//! Primary error type for TimberDB operations.
//!
//! Structured variants for the common cases, a numeric code mapping for
//! callers that speak exit codes, and a transience predicate so schedulers
//! can tell "retry later" from "give up".

use thiserror::Error;

/// Primary error type for TimberDB operations.
#[derive(Error, Debug)]
pub enum TimberError {
    // === Contention ===
    /// The operation cannot proceed right now; the caller should reschedule.
    ///
    /// Reconciliation surfaces this when a committed update is followed by
    /// uncommitted ones it cannot strand, or when the caller demanded a clean
    /// page but invisible updates remain.
    #[error("resource busy")]
    Busy,

    // === Invariant violations ===
    /// Unrecoverable invariant violation; the storage engine must not
    /// continue writing.
    #[error("panic: {detail}")]
    Panic { detail: String },

    // === Allocation ===
    /// The update arena cannot satisfy an allocation.
    #[error("update allocation failed: {detail}")]
    AllocFailed { detail: String },

    // === Page access ===
    /// A cell payload could not be resolved by the page provider.
    #[error("cell payload unavailable: {detail}")]
    CellPayload { detail: String },

    // === I/O ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Numeric codes exposed at process boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Error = 1,
    Busy = 5,
    NoMem = 7,
    Panic = 8,
    IoErr = 10,
}

impl TimberError {
    /// Map to the coarse numeric code.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Busy => ErrorCode::Busy,
            Self::Panic { .. } => ErrorCode::Panic,
            Self::AllocFailed { .. } => ErrorCode::NoMem,
            Self::CellPayload { .. } => ErrorCode::Error,
            Self::Io(_) => ErrorCode::IoErr,
        }
    }

    /// Whether retrying the same operation later can succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Busy)
    }

    /// Construct a panic error with a detail message.
    #[must_use]
    pub fn panic(detail: impl Into<String>) -> Self {
        Self::Panic {
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TimberError>;
