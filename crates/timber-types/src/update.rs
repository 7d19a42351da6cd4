//! Update classification: kinds, prepare states, and flags.

/// What an update chain entry represents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum UpdateKind {
    /// A full replacement value.
    Standard = 0,
    /// A delta over the next-older full value.
    Modify = 1,
    /// A logical delete.
    Tombstone = 2,
    /// A placeholder reserved by a transaction; never written to disk.
    Reserve = 3,
}

impl UpdateKind {
    /// Whether the entry carries a complete value on its own.
    ///
    /// Standard values and tombstones are self-contained; a modify is only
    /// meaningful relative to the value below it.
    #[inline]
    #[must_use]
    pub const fn is_self_contained(self) -> bool {
        matches!(self, Self::Standard | Self::Tombstone)
    }

    /// Whether the entry may be written to the data store.
    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Standard | Self::Modify)
    }
}

/// Two-phase commit state of an update.
///
/// `Locked` and `InProgress` behave identically except under eviction, where
/// only `InProgress` may be selected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum PrepareState {
    /// Not part of a prepared transaction.
    #[default]
    None = 0,
    /// Prepared; commit or rollback has not happened yet.
    InProgress = 1,
    /// Transiently locked while the prepared transaction resolves.
    Locked = 2,
    /// The prepared transaction has committed.
    Resolved = 3,
}

impl PrepareState {
    /// Whether the owning transaction's two-phase commit is still pending.
    #[inline]
    #[must_use]
    pub const fn is_unresolved(self) -> bool {
        matches!(self, Self::InProgress | Self::Locked)
    }

    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode from the raw atomic representation.
    #[inline]
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::InProgress,
            2 => Self::Locked,
            3 => Self::Resolved,
            _ => Self::None,
        }
    }
}

bitflags::bitflags! {
    /// Per-update markers orthogonal to the kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UpdateFlags: u8 {
        /// The entry was reconstructed from the history store while rolling
        /// back to the stable timestamp; the on-disk original is already
        /// represented by it.
        const RESTORED_FROM_HS = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_contained_kinds() {
        assert!(UpdateKind::Standard.is_self_contained());
        assert!(UpdateKind::Tombstone.is_self_contained());
        assert!(!UpdateKind::Modify.is_self_contained());
        assert!(!UpdateKind::Reserve.is_self_contained());
    }

    #[test]
    fn test_writable_kinds() {
        assert!(UpdateKind::Standard.is_writable());
        assert!(UpdateKind::Modify.is_writable());
        assert!(!UpdateKind::Tombstone.is_writable());
        assert!(!UpdateKind::Reserve.is_writable());
    }

    #[test]
    fn test_prepare_state_round_trip() {
        for state in [
            PrepareState::None,
            PrepareState::InProgress,
            PrepareState::Locked,
            PrepareState::Resolved,
        ] {
            assert_eq!(PrepareState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_unresolved_states() {
        assert!(PrepareState::InProgress.is_unresolved());
        assert!(PrepareState::Locked.is_unresolved());
        assert!(!PrepareState::None.is_unresolved());
        assert!(!PrepareState::Resolved.is_unresolved());
    }
}
