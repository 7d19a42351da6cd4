//! Update chains: intrusive newest-first lists over an arena.
//!
//! A key's pending modifications form a singly-linked list with the newest
//! entry at the head. The reconciling worker is the only writer and only ever
//! appends at the tail; readers traverse concurrently through acquire loads
//! of the packed `next` slots, so a published link always leads to a fully
//! initialised node.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

use timber_error::{Result, TimberError};
use timber_types::{PrepareState, TimePair, Timestamp, TxnId, UpdateFlags, UpdateKind};

/// Packed sentinel meaning "no next entry".
///
/// Offsets never reach `u32::MAX` (chunks hold [`ARENA_CHUNK`] slots), so the
/// sentinel cannot collide with a real packed index.
const CHAIN_END: u64 = u64::MAX;

/// Number of update slots per arena chunk.
const ARENA_CHUNK: usize = 4096;

// ---------------------------------------------------------------------------
// UpdateIdx
// ---------------------------------------------------------------------------

/// Index into an [`UpdateArena`] chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdateIdx {
    chunk: u32,
    offset: u32,
}

impl UpdateIdx {
    #[inline]
    pub(crate) const fn new(chunk: u32, offset: u32) -> Self {
        Self { chunk, offset }
    }

    /// Pack into the u64 representation stored in atomic `next` slots.
    #[inline]
    #[must_use]
    pub const fn pack(self) -> u64 {
        ((self.chunk as u64) << 32) | self.offset as u64
    }

    /// Unpack from an atomic slot value; `CHAIN_END` decodes to `None`.
    #[inline]
    #[must_use]
    pub const fn unpack(raw: u64) -> Option<Self> {
        if raw == CHAIN_END {
            return None;
        }
        Some(Self {
            chunk: (raw >> 32) as u32,
            offset: raw as u32,
        })
    }
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// One entry in a key's modification chain.
///
/// `txn_id` and `prepare_state` may be rewritten by a concurrently committing
/// or aborting transaction; the walker reads them as atomic scalars and
/// treats the observed values as authoritative for the remainder of the walk.
/// Everything else is immutable after creation.
#[derive(Debug)]
pub struct Update {
    kind: UpdateKind,
    flags: UpdateFlags,
    txn_id: AtomicU64,
    start_ts: Timestamp,
    durable_ts: Timestamp,
    prepare_state: AtomicU8,
    payload: Option<Vec<u8>>,
    next: AtomicU64,
}

impl Update {
    fn new(
        kind: UpdateKind,
        txn: TxnId,
        start_ts: Timestamp,
        durable_ts: Timestamp,
        payload: Option<Vec<u8>>,
    ) -> Self {
        Self {
            kind,
            flags: UpdateFlags::empty(),
            txn_id: AtomicU64::new(txn.get()),
            start_ts,
            durable_ts,
            prepare_state: AtomicU8::new(PrepareState::None.as_u8()),
            payload,
            next: AtomicU64::new(CHAIN_END),
        }
    }

    /// A full replacement value.
    #[must_use]
    pub fn standard(txn: TxnId, start_ts: Timestamp, durable_ts: Timestamp, payload: Vec<u8>) -> Self {
        Self::new(UpdateKind::Standard, txn, start_ts, durable_ts, Some(payload))
    }

    /// A delta over the next-older full value.
    #[must_use]
    pub fn modify(txn: TxnId, start_ts: Timestamp, durable_ts: Timestamp, delta: Vec<u8>) -> Self {
        Self::new(UpdateKind::Modify, txn, start_ts, durable_ts, Some(delta))
    }

    /// A logical delete.
    #[must_use]
    pub fn tombstone(txn: TxnId, start_ts: Timestamp, durable_ts: Timestamp) -> Self {
        Self::new(UpdateKind::Tombstone, txn, start_ts, durable_ts, None)
    }

    /// A reserved placeholder; never selected for writing.
    #[must_use]
    pub fn reserve(txn: TxnId) -> Self {
        Self::new(UpdateKind::Reserve, txn, Timestamp::NONE, Timestamp::NONE, None)
    }

    /// Builder: mark with additional flags.
    #[must_use]
    pub fn with_flags(mut self, flags: UpdateFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Builder: set the two-phase commit state.
    #[must_use]
    pub fn with_prepare(self, state: PrepareState) -> Self {
        self.prepare_state.store(state.as_u8(), Ordering::Relaxed);
        self
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> UpdateKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn flags(&self) -> UpdateFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        TxnId::new(self.txn_id.load(Ordering::Acquire))
    }

    /// Roll the owning transaction back: the entry becomes invisible to every
    /// walker from this point on.
    pub fn abort(&self) {
        self.txn_id.store(TxnId::ABORTED.get(), Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    #[inline]
    #[must_use]
    pub fn durable_ts(&self) -> Timestamp {
        self.durable_ts
    }

    #[inline]
    #[must_use]
    pub fn prepare_state(&self) -> PrepareState {
        PrepareState::from_u8(self.prepare_state.load(Ordering::Acquire))
    }

    pub fn set_prepare_state(&self, state: PrepareState) {
        self.prepare_state.store(state.as_u8(), Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn start_pair(&self) -> TimePair {
        TimePair::new(self.start_ts, self.txn_id())
    }

    /// Acquire-load the link to the next-older entry.
    #[inline]
    #[must_use]
    pub fn next(&self) -> Option<UpdateIdx> {
        UpdateIdx::unpack(self.next.load(Ordering::Acquire))
    }

    /// Link an unpublished node; no ordering needed before publication.
    pub fn link_next(&self, idx: UpdateIdx) {
        self.next.store(idx.pack(), Ordering::Relaxed);
    }

    /// Publish a new tail entry with release semantics so that concurrent
    /// readers following the link observe fully initialised nodes.
    pub fn publish_next(&self, idx: UpdateIdx) {
        self.next.store(idx.pack(), Ordering::Release);
    }

    /// Bytes this entry accounts for against the page footprint.
    #[must_use]
    pub fn memsize(&self) -> usize {
        std::mem::size_of::<Self>() + self.payload.as_ref().map_or(0, Vec::len)
    }
}

// ---------------------------------------------------------------------------
// UpdateArena
// ---------------------------------------------------------------------------

/// Chunked slab owning every update on a page.
///
/// Slots never move once allocated: chunks are pre-sized and only the chunk
/// directory grows, so an [`UpdateIdx`] stays valid until freed.
pub struct UpdateArena {
    chunks: Vec<Vec<Option<Update>>>,
    free_list: Vec<UpdateIdx>,
    high_water: u64,
}

impl UpdateArena {
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunks: vec![Vec::with_capacity(ARENA_CHUNK)],
            free_list: Vec::new(),
            high_water: 0,
        }
    }

    /// Allocate a slot for `upd`, returning its index and accounted size.
    pub fn alloc(&mut self, upd: Update) -> Result<(UpdateIdx, usize)> {
        let size = upd.memsize();

        if let Some(idx) = self.free_list.pop() {
            self.chunks[idx.chunk as usize][idx.offset as usize] = Some(upd);
            return Ok((idx, size));
        }

        let last_chunk = self.chunks.len() - 1;
        if self.chunks[last_chunk].len() >= ARENA_CHUNK {
            self.chunks.push(Vec::with_capacity(ARENA_CHUNK));
        }

        let chunk_idx = self.chunks.len() - 1;
        let offset = self.chunks[chunk_idx].len();
        let chunk_u32 = u32::try_from(chunk_idx).map_err(|_| TimberError::AllocFailed {
            detail: format!("update arena chunk index {chunk_idx} overflows u32"),
        })?;
        self.chunks[chunk_idx].push(Some(upd));
        self.high_water += 1;

        // Offsets are bounded by ARENA_CHUNK, far below u32::MAX.
        #[allow(clippy::cast_possible_truncation)]
        let offset_u32 = offset as u32;
        Ok((UpdateIdx::new(chunk_u32, offset_u32), size))
    }

    /// Free the slot at `idx`, returning the bytes it accounted for.
    ///
    /// # Panics
    ///
    /// Asserts that the slot is currently occupied (catches double-free).
    pub fn free(&mut self, idx: UpdateIdx) -> usize {
        let slot = &mut self.chunks[idx.chunk as usize][idx.offset as usize];
        let size = slot
            .as_ref()
            .unwrap_or_else(|| panic!("UpdateArena::free: double-free of {idx:?}"))
            .memsize();
        *slot = None;
        self.free_list.push(idx);
        size
    }

    #[must_use]
    pub fn get(&self, idx: UpdateIdx) -> Option<&Update> {
        self.chunks
            .get(idx.chunk as usize)?
            .get(idx.offset as usize)?
            .as_ref()
    }

    /// Walk a chain from `head` towards the tail.
    #[must_use]
    pub fn iter_chain(&self, head: UpdateIdx) -> ChainIter<'_> {
        ChainIter {
            arena: self,
            cur: Some(head),
        }
    }

    /// Total updates ever allocated (including freed).
    #[must_use]
    pub fn high_water(&self) -> u64 {
        self.high_water
    }
}

impl Default for UpdateArena {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UpdateArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateArena")
            .field("chunk_count", &self.chunks.len())
            .field("free_count", &self.free_list.len())
            .field("high_water", &self.high_water)
            .finish_non_exhaustive()
    }
}

/// Iterator over a chain, newest to oldest.
pub struct ChainIter<'a> {
    arena: &'a UpdateArena,
    cur: Option<UpdateIdx>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (UpdateIdx, &'a Update);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let upd = self.arena.get(idx)?;
        self.cur = upd.next();
        Some((idx, upd))
    }
}

// ---------------------------------------------------------------------------
// UpdateStore
// ---------------------------------------------------------------------------

/// Shared handle over the arena: single reconciling writer, many readers.
///
/// Allocation takes the write lock briefly; traversal holds the read lock and
/// follows acquire-loaded links, so a reader never observes a partially
/// initialised entry.
#[derive(Debug, Default)]
pub struct UpdateStore {
    arena: RwLock<UpdateArena>,
}

impl UpdateStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(UpdateArena::new()),
        }
    }

    pub fn alloc(&self, upd: Update) -> Result<(UpdateIdx, usize)> {
        self.arena.write().alloc(upd)
    }

    pub fn free(&self, idx: UpdateIdx) -> usize {
        self.arena.write().free(idx)
    }

    #[must_use]
    pub fn read(&self) -> RwLockReadGuard<'_, UpdateArena> {
        self.arena.read()
    }

    /// Allocate a whole chain newest-first, linking each entry to the next.
    /// Returns the head index. Intended for reconciliation drivers and tests.
    pub fn build_chain(&self, updates: Vec<Update>) -> Result<Option<UpdateIdx>> {
        let mut head: Option<UpdateIdx> = None;
        for upd in updates.into_iter().rev() {
            if let Some(older) = head {
                upd.link_next(older);
            }
            let (idx, _) = self.alloc(upd)?;
            head = Some(idx);
        }
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: u64) -> Timestamp {
        Timestamp::new(raw)
    }

    fn txn(raw: u64) -> TxnId {
        TxnId::new(raw)
    }

    #[test]
    fn test_pack_round_trip() {
        let idx = UpdateIdx::new(3, 917);
        assert_eq!(UpdateIdx::unpack(idx.pack()), Some(idx));
        assert_eq!(UpdateIdx::unpack(CHAIN_END), None);
    }

    #[test]
    fn test_alloc_get_free_cycle() {
        let mut arena = UpdateArena::new();
        let (idx, size) = arena
            .alloc(Update::standard(txn(1), ts(10), ts(10), vec![0; 16]))
            .unwrap();
        assert_eq!(size, std::mem::size_of::<Update>() + 16);
        assert_eq!(arena.get(idx).unwrap().kind(), UpdateKind::Standard);

        let freed = arena.free(idx);
        assert_eq!(freed, size);
        assert!(arena.get(idx).is_none());

        // The freed slot is recycled.
        let (idx2, _) = arena.alloc(Update::tombstone(txn(2), ts(20), ts(20))).unwrap();
        assert_eq!(idx2, idx);
    }

    #[test]
    #[should_panic(expected = "double-free")]
    fn test_double_free_panics() {
        let mut arena = UpdateArena::new();
        let (idx, _) = arena.alloc(Update::tombstone(txn(1), ts(1), ts(1))).unwrap();
        arena.free(idx);
        arena.free(idx);
    }

    #[test]
    fn test_build_chain_orders_newest_first() {
        let store = UpdateStore::new();
        let head = store
            .build_chain(vec![
                Update::standard(txn(5), ts(30), ts(30), b"new".to_vec()),
                Update::standard(txn(3), ts(20), ts(20), b"old".to_vec()),
            ])
            .unwrap()
            .unwrap();

        let arena = store.read();
        let chain: Vec<_> = arena.iter_chain(head).map(|(_, u)| u.txn_id()).collect();
        assert_eq!(chain, vec![txn(5), txn(3)]);
    }

    #[test]
    fn test_publish_extends_tail() {
        let store = UpdateStore::new();
        let head = store
            .build_chain(vec![Update::tombstone(txn(9), ts(50), ts(50))])
            .unwrap()
            .unwrap();

        let (appended, _) = store
            .alloc(Update::standard(txn(3), ts(20), ts(20), b"disk".to_vec()))
            .unwrap();

        let arena = store.read();
        arena.get(head).unwrap().publish_next(appended);
        let chain: Vec<_> = arena.iter_chain(head).map(|(_, u)| u.kind()).collect();
        assert_eq!(chain, vec![UpdateKind::Tombstone, UpdateKind::Standard]);
    }

    #[test]
    fn test_abort_is_observable() {
        let store = UpdateStore::new();
        let head = store
            .build_chain(vec![Update::standard(txn(7), ts(40), ts(40), vec![1])])
            .unwrap()
            .unwrap();
        let arena = store.read();
        let upd = arena.get(head).unwrap();
        assert!(!upd.txn_id().is_aborted());
        upd.abort();
        assert!(upd.txn_id().is_aborted());
    }

    #[test]
    fn test_memsize_counts_payload() {
        let upd = Update::standard(txn(1), ts(1), ts(1), vec![0; 100]);
        let tomb = Update::tombstone(txn(1), ts(1), ts(1));
        assert_eq!(upd.memsize() - tomb.memsize(), 100);
    }
}
