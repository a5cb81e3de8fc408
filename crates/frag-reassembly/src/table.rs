//! Reassembly table: transaction id → in-progress message buffer.
//!
//! Backed by a sharded [`DashMap`]. Buffer creation and payload writes for a
//! given id run under that id's shard write lock for the whole apply step, so
//! at most one buffer is ever created per id while fragments for ids in other
//! shards proceed in parallel.
//!
//! ## Closing
//! [`ReassemblyTable::close`] freezes the table. `apply` checks the closed flag
//! while holding the shard lock, so a snapshot taken after `close` returns
//! sees every fragment that was admitted and nothing that was not.
//!
//! ## Capacity policy
//! Capacity is fixed when the buffer is created by the first fragment seen for
//! an id: the declared size if that fragment ends the message, otherwise the
//! table's default capacity. A later end-of-message fragment never resizes the
//! buffer. When it arrives after a non-final fragment the buffer keeps the
//! default capacity and the tail stays zero-filled; trimming in
//! [`crate::completion`] collapses it back to the written length.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::completion;
use crate::decoder::Fragment;

/// Capacity of a buffer created before the message size is known (1 MiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Result of copying one fragment's payload into its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Written,
    /// Header-only datagram; nothing to copy.
    EmptyPayload,
    /// `offset + len` overruns the buffer; the fragment was dropped.
    OutOfBounds { end: Option<usize>, capacity: usize },
    /// The table was closed; nothing was created or written.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// This fragment created the buffer for its transaction.
    pub created: bool,
    pub write: WriteResult,
}

/// One in-progress message. Capacity never changes after creation.
#[derive(Debug)]
pub struct MessageBuffer {
    data: Vec<u8>,
    created_at: Instant,
    /// Size carried by the end-of-message fragment, once seen.
    declared_size: Option<u16>,
}

impl MessageBuffer {
    fn new(capacity: usize, created_at: Instant) -> Self {
        Self {
            data: vec![0u8; capacity],
            created_at,
            declared_size: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn declared_size(&self) -> Option<u16> {
        self.declared_size
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn write(&mut self, frag: &Fragment<'_>) -> WriteResult {
        if frag.payload.is_empty() {
            return WriteResult::EmptyPayload;
        }
        let capacity = self.data.len();
        match frag.end() {
            Some(end) if end <= capacity => {
                self.data[frag.offset as usize..end].copy_from_slice(frag.payload);
                WriteResult::Written
            }
            end => WriteResult::OutOfBounds { end, capacity },
        }
    }
}

/// Trimmed copy of one buffer, taken under its shard lock and inspected lock-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub transaction_id: u32,
    pub capacity: usize,
    pub declared_size: Option<u16>,
    pub content: Vec<u8>,
}

pub struct ReassemblyTable {
    buffers: DashMap<u32, MessageBuffer>,
    default_capacity: usize,
    closed: AtomicBool,
}

impl ReassemblyTable {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            default_capacity,
            closed: AtomicBool::new(false),
        }
    }

    pub fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    /// Apply one decoded fragment: create the buffer on first sight of its
    /// transaction id, then copy the payload at its offset if it fits.
    ///
    /// Re-applying the same fragment rewrites identical bytes, so replay is a no-op.
    /// After [`close`](Self::close) every fragment is refused with
    /// [`WriteResult::Closed`].
    pub fn apply(&self, frag: &Fragment<'_>) -> ApplyOutcome {
        let entry = self.buffers.entry(frag.transaction_id);
        // The shard write lock is held from here on.
        if self.is_closed() {
            return ApplyOutcome { created: false, write: WriteResult::Closed };
        }
        let mut created = false;
        let mut buf = entry.or_insert_with(|| {
            created = true;
            let capacity = if frag.end_of_message {
                frag.declared_size as usize
            } else {
                self.default_capacity
            };
            MessageBuffer::new(capacity, Instant::now())
        });
        let buf = buf.value_mut();
        if frag.end_of_message {
            buf.declared_size = Some(frag.declared_size);
        }
        ApplyOutcome { created, write: buf.write(frag) }
    }

    /// Refuse all further fragments. Returns `true` for the call that closed it.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn contains(&self, transaction_id: u32) -> bool {
        self.buffers.contains_key(&transaction_id)
    }

    pub fn capacity_of(&self, transaction_id: u32) -> Option<usize> {
        self.buffers.get(&transaction_id).map(|b| b.capacity())
    }

    /// Trimmed content of one buffer.
    pub fn content(&self, transaction_id: u32) -> Option<Vec<u8>> {
        self.buffers
            .get(&transaction_id)
            .map(|b| completion::trimmed(b.data()).to_vec())
    }

    /// Copy out every buffer's trimmed content, ordered by transaction id.
    /// Each shard is read-locked only while its entries are copied.
    pub fn snapshot(&self) -> Vec<BufferSnapshot> {
        let mut out: Vec<BufferSnapshot> = self
            .buffers
            .iter()
            .map(|e| BufferSnapshot {
                transaction_id: *e.key(),
                capacity: e.capacity(),
                declared_size: e.declared_size(),
                content: completion::trimmed(e.data()).to_vec(),
            })
            .collect();
        out.sort_unstable_by_key(|s| s.transaction_id);
        out
    }

    /// Drop buffers created more than `max_age` before `now`. Returns the evicted ids.
    pub fn evict_older_than(&self, max_age: Duration, now: Instant) -> Vec<u32> {
        let mut evicted = Vec::new();
        self.buffers.retain(|&id, buf| {
            let keep = now.saturating_duration_since(buf.created_at) <= max_age;
            if !keep {
                evicted.push(id);
            }
            keep
        });
        evicted
    }
}

impl Default for ReassemblyTable {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::ContentDigest;

    const MSG: &[u8] = b"ABCDEFGHIJ";

    fn frag(txid: u32, offset: u32, payload: &[u8], eom: bool) -> Fragment<'_> {
        Fragment {
            end_of_message: eom,
            declared_size: if eom { MSG.len() as u16 } else { 0 },
            offset,
            transaction_id: txid,
            payload,
        }
    }

    /// The three fragments of `MSG`: [0..4), [4..8), [8..10) with end-of-message.
    fn parts(txid: u32) -> [Fragment<'static>; 3] {
        [
            frag(txid, 0, &MSG[0..4], false),
            frag(txid, 4, &MSG[4..8], false),
            frag(txid, 8, &MSG[8..10], true),
        ]
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let table = ReassemblyTable::default();
        let [f0, f1, f2] = parts(1);
        for f in [f2, f0, f1] {
            assert_eq!(table.apply(&f).write, WriteResult::Written);
        }
        let content = table.content(1).unwrap();
        assert_eq!(content, MSG);
        assert_eq!(ContentDigest::of(&content), ContentDigest::of(MSG));
    }

    #[test]
    fn test_final_fragment_first_sizes_buffer() {
        let table = ReassemblyTable::default();
        let [f0, f1, f2] = parts(1);
        let first = table.apply(&f2);
        assert!(first.created);
        assert_eq!(table.capacity_of(1), Some(10));
        assert!(!table.apply(&f0).created);
        table.apply(&f1);
        assert_eq!(table.content(1).unwrap(), MSG);
    }

    #[test]
    fn test_late_final_fragment_keeps_default_capacity() {
        let table = ReassemblyTable::default();
        let [f0, f1, f2] = parts(1);
        table.apply(&f0);
        table.apply(&f2);
        table.apply(&f1);
        assert_eq!(table.capacity_of(1), Some(DEFAULT_BUFFER_CAPACITY));
        assert_eq!(table.content(1).unwrap(), MSG);
        let snap = table.snapshot();
        assert_eq!(snap[0].declared_size, Some(10));
        assert_eq!(snap[0].capacity, DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn test_every_permutation_yields_same_content() {
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let expected = ContentDigest::of(MSG);
        for order in orders {
            let table = ReassemblyTable::new(64);
            let p = parts(9);
            for i in order {
                table.apply(&p[i]);
            }
            let content = table.content(9).unwrap();
            assert_eq!(content, MSG, "order {:?}", order);
            assert_eq!(ContentDigest::of(&content), expected);
        }
    }

    #[test]
    fn test_replay_is_idempotent() {
        let table = ReassemblyTable::default();
        let [f0, f1, f2] = parts(1);
        table.apply(&f2);
        table.apply(&f0);
        let before = table.content(1).unwrap();
        table.apply(&f0);
        table.apply(&f2);
        assert_eq!(table.content(1).unwrap(), before);
        table.apply(&f1);
        table.apply(&f1);
        assert_eq!(table.content(1).unwrap(), MSG);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_transactions_isolated() {
        let table = ReassemblyTable::default();
        for f in parts(1) {
            table.apply(&f);
        }
        table.apply(&frag(2, 0, b"zz", false));
        assert_eq!(table.content(1).unwrap(), MSG);
        assert_eq!(table.content(2).unwrap(), b"zz");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_out_of_bounds_dropped() {
        let table = ReassemblyTable::default();
        let [_, _, f2] = parts(1);
        table.apply(&f2);
        let outcome = table.apply(&frag(1, 9, b"XY", false));
        assert_eq!(
            outcome.write,
            WriteResult::OutOfBounds { end: Some(11), capacity: 10 }
        );
        let outcome = table.apply(&frag(1, u32::MAX, b"X", false));
        assert!(matches!(outcome.write, WriteResult::OutOfBounds { .. }));
        assert_eq!(table.content(1).unwrap(), b"\0\0\0\0\0\0\0\0IJ");
    }

    #[test]
    fn test_exact_fit_accepted() {
        let table = ReassemblyTable::new(4);
        assert_eq!(table.apply(&frag(3, 0, b"WXYZ", false)).write, WriteResult::Written);
        assert_eq!(table.content(3).unwrap(), b"WXYZ");
    }

    #[test]
    fn test_header_only_fragment_creates_buffer() {
        let table = ReassemblyTable::default();
        let outcome = table.apply(&frag(5, 0, b"", false));
        assert!(outcome.created);
        assert_eq!(outcome.write, WriteResult::EmptyPayload);
        assert!(table.contains(5));
        assert_eq!(table.content(5).unwrap(), b"");
    }

    #[test]
    fn test_zero_declared_size_drops_payloads() {
        let table = ReassemblyTable::default();
        let mut f = frag(6, 0, b"A", true);
        f.declared_size = 0;
        let outcome = table.apply(&f);
        assert!(outcome.created);
        assert!(matches!(outcome.write, WriteResult::OutOfBounds { capacity: 0, .. }));
    }

    #[test]
    fn test_snapshot_sorted() {
        let table = ReassemblyTable::new(16);
        for id in [30, 10, 20] {
            table.apply(&frag(id, 0, b"x", false));
        }
        let ids: Vec<u32> = table.snapshot().iter().map(|s| s.transaction_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_evict_older_than() {
        let table = ReassemblyTable::new(16);
        table.apply(&frag(1, 0, b"x", false));
        let now = Instant::now();
        assert!(table.evict_older_than(Duration::from_secs(60), now).is_empty());
        let later = now + Duration::from_secs(120);
        assert_eq!(table.evict_older_than(Duration::from_secs(60), later), vec![1]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_closed_table_refuses_fragments() {
        let table = ReassemblyTable::new(16);
        let [f0, f1, _] = parts(1);
        table.apply(&f0);
        assert!(table.close());
        assert!(!table.close());

        let outcome = table.apply(&f1);
        assert_eq!(outcome, ApplyOutcome { created: false, write: WriteResult::Closed });
        assert_eq!(table.apply(&frag(2, 0, b"new", false)).write, WriteResult::Closed);
        assert!(!table.contains(2));
        assert_eq!(table.content(1).unwrap(), b"ABCD");
    }

    #[test]
    fn test_snapshot_after_close_is_final() {
        use std::sync::Arc;
        let table = Arc::new(ReassemblyTable::new(16));
        let writers: Vec<_> = (0..4u32)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    let mut created = 0usize;
                    for i in 0u32.. {
                        let outcome = table.apply(&frag(t * 1_000_000 + i, 0, b"x", false));
                        if outcome.write == WriteResult::Closed {
                            break;
                        }
                        created += usize::from(outcome.created);
                    }
                    created
                })
            })
            .collect();
        std::thread::sleep(Duration::from_millis(20));
        table.close();
        let snap = table.snapshot();
        let created: usize = writers.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(snap.len(), created);
        assert_eq!(table.len(), created);
    }

    #[test]
    fn test_concurrent_creation_single_buffer() {
        use std::sync::Arc;
        let table = Arc::new(ReassemblyTable::new(4096));
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    let payload = [b'a' + t as u8; 16];
                    table.apply(&Fragment {
                        end_of_message: false,
                        declared_size: 0,
                        offset: t * 16,
                        transaction_id: 77,
                        payload: &payload,
                    })
                    .created
                })
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&c| c)
            .count();
        assert_eq!(created, 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.content(77).unwrap().len(), 128);
    }
}
