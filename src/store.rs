//! Bounded in-memory record store with half-eviction.
//!
//! The store is owned by the UI task; every mutation happens on that task,
//! so no synchronization is needed.

use std::sync::Arc;

use crate::record::Record;

/// Hard upper bound on the configured capacity.
pub const MAX_CAPACITY: usize = 65_535;

/// One stored row: a 1-based sequence number plus the record it names.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub seq: u32,
    pub record: Arc<Record>,
}

/// What `append` did besides storing the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { seq: u32 },
    /// The store was full; the oldest half was dropped before appending.
    Evicted { dropped: usize, seq: u32 },
}

/// Fixed-capacity record log. Sequence numbers are contiguous `1..=len()`
/// at all times; eviction renumbers the surviving suffix.
#[derive(Debug)]
pub struct RecordStore {
    capacity: usize,
    entries: Vec<StoredRecord>,
}

impl RecordStore {
    /// Create a store with `capacity` clamped to `[1, 65535]`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CAPACITY);
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// Append a record, evicting the oldest half first if the store is full.
    pub fn append(&mut self, record: Arc<Record>) -> AppendOutcome {
        let mut dropped = 0;
        if self.is_full() {
            dropped = self.remove_half();
        }
        let seq = self.entries.len() as u32 + 1;
        self.entries.push(StoredRecord { seq, record });
        if dropped > 0 {
            AppendOutcome::Evicted { dropped, seq }
        } else {
            AppendOutcome::Appended { seq }
        }
    }

    /// Drop the oldest half of the store and renumber the survivors from 1.
    /// Returns how many records were removed.
    pub fn remove_half(&mut self) -> usize {
        let total = self.entries.len();
        let keep_from = total / 2;
        self.entries.drain(..keep_from);
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.seq = i as u32 + 1;
        }
        keep_from
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Record at the given 1-based row, or `None` past the end.
    pub fn get(&self, row: usize) -> Option<&StoredRecord> {
        if row == 0 {
            return None;
        }
        self.entries.get(row - 1)
    }

    /// Replace the whole contents (load path). Rows are renumbered from 1.
    pub fn replace(&mut self, records: Vec<Arc<Record>>) {
        self.entries.clear();
        for record in records {
            if self.is_full() {
                self.remove_half();
            }
            let seq = self.entries.len() as u32 + 1;
            self.entries.push(StoredRecord { seq, record });
        }
    }

    /// Records at the given rows, in ascending sequence order. Rows that no
    /// longer exist are skipped.
    pub fn select<'a>(
        &'a self,
        rows: impl IntoIterator<Item = &'a usize>,
    ) -> Vec<Arc<Record>> {
        let mut out = Vec::new();
        for &row in rows {
            if let Some(entry) = self.get(row) {
                out.push(entry.record.clone());
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredRecord> {
        self.entries.iter()
    }

    /// All records in sequence order.
    pub fn all(&self) -> Vec<Arc<Record>> {
        self.entries.iter().map(|e| e.record.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Endpoint, Flow, TransportKind};
    use chrono::Utc;

    fn record(tag: u8) -> Arc<Record> {
        Arc::new(Record {
            transport_kind: TransportKind::Tcp,
            net: Flow::new(
                Endpoint::from_ip("127.0.0.1".parse().unwrap()),
                Endpoint::from_ip("127.0.0.2".parse().unwrap()),
            ),
            transport: Flow::new(Endpoint::tcp_port(1000), Endpoint::tcp_port(2000)),
            seen: Utc::now(),
            bodies: vec![Box::new(tag)],
            raw: vec![tag],
        })
    }

    fn tags(store: &RecordStore) -> Vec<u8> {
        store.iter().map(|e| e.record.raw[0]).collect()
    }

    #[test]
    fn capacity_is_clamped() {
        assert_eq!(RecordStore::new(0).capacity(), 1);
        assert_eq!(RecordStore::new(70_000).capacity(), MAX_CAPACITY);
        assert_eq!(RecordStore::new(16).capacity(), 16);
    }

    #[test]
    fn append_assigns_contiguous_sequences() {
        let mut store = RecordStore::new(8);
        for tag in 1..=5 {
            store.append(record(tag));
        }
        let seqs: Vec<u32> = store.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn eviction_keeps_upper_half_and_renumbers() {
        // capacity 4, publish A..E: after E the store holds C,D,E seq 1..3
        let mut store = RecordStore::new(4);
        for tag in [b'A', b'B', b'C', b'D'] {
            store.append(record(tag));
        }
        let outcome = store.append(record(b'E'));
        assert_eq!(outcome, AppendOutcome::Evicted { dropped: 2, seq: 3 });
        assert_eq!(tags(&store), vec![b'C', b'D', b'E']);
        let seqs: Vec<u32> = store.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let mut store = RecordStore::new(5);
        for tag in 0..50 {
            store.append(record(tag));
            assert!(store.len() <= store.capacity());
        }
    }

    #[test]
    fn get_is_one_based() {
        let mut store = RecordStore::new(4);
        store.append(record(7));
        assert!(store.get(0).is_none());
        assert_eq!(store.get(1).unwrap().record.raw, vec![7]);
        assert!(store.get(2).is_none());
    }

    #[test]
    fn select_returns_sorted_subset() {
        let mut store = RecordStore::new(8);
        for tag in 1..=6 {
            store.append(record(tag));
        }
        let rows: std::collections::BTreeSet<usize> = [5, 2, 9].into_iter().collect();
        let picked = store.select(rows.iter());
        let picked: Vec<u8> = picked.iter().map(|r| r.raw[0]).collect();
        assert_eq!(picked, vec![2, 5]); // row 9 skipped, ascending order
    }

    #[test]
    fn replace_renumbers_from_one() {
        let mut store = RecordStore::new(8);
        store.append(record(1));
        store.replace(vec![record(10), record(11)]);
        let seqs: Vec<u32> = store.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(tags(&store), vec![10, 11]);
    }

    #[test]
    fn clear_empties_store() {
        let mut store = RecordStore::new(4);
        store.append(record(1));
        store.clear();
        assert!(store.is_empty());
    }
}
