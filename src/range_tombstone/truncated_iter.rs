// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Bounds a [`FragmentedTombstoneList`] to one sorted run's `[smallest,
//! largest]` file range, and hands the merging iterator file-boundary
//! sentinel keys so it knows when to stop consulting this level.

use super::FragmentedTombstoneList;
use crate::key::{InternalKey, ValueType};
use crate::SeqNo;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Position {
    /// Positioned at `fragments()[idx]`.
    At(usize),
    /// Ran off the left edge of the file's key range.
    BeforeFirst,
    /// Ran off the right edge of the file's key range.
    AfterLast,
}

/// Truncates a shared [`FragmentedTombstoneList`] to the `[smallest,
/// largest]` internal-key bound of one table/memtable, per §4.2.
pub struct TruncatedRangeDelIterator {
    list: Arc<FragmentedTombstoneList>,
    smallest: InternalKey,
    largest: InternalKey,
    /// `[lo, hi)` index range of fragments overlapping `[smallest, largest]`.
    usable: std::ops::Range<usize>,
    pos: Position,
}

impl TruncatedRangeDelIterator {
    /// # Panics
    /// Panics if `smallest > largest`.
    #[must_use]
    pub fn new(list: Arc<FragmentedTombstoneList>, smallest: InternalKey, largest: InternalKey) -> Self {
        assert!(smallest <= largest, "file bound must be non-empty");

        let frags = list.fragments_slice();
        let lo = frags.partition_point(|f| f.end.as_ref() <= smallest.user_key.as_ref());
        let hi = frags.partition_point(|f| f.start.as_ref() <= largest.user_key.as_ref());
        let usable = lo..hi.max(lo);

        Self {
            list,
            smallest,
            largest,
            usable,
            pos: Position::BeforeFirst,
        }
    }

    fn frags(&self) -> &[crate::range_tombstone::fragmenter::TombstoneFragment] {
        self.list.fragments_slice()
    }

    /// `true` if positioned at a real fragment (not a file-boundary sentinel).
    #[must_use]
    pub fn valid(&self) -> bool {
        matches!(self.pos, Position::At(_))
    }

    /// Seeks to the fragment covering `user_key`, or the earliest fragment
    /// ending after it if none covers it exactly; past the file's last key,
    /// positions on the `AfterLast` sentinel.
    pub fn seek(&mut self, user_key: &[u8]) {
        if user_key > self.largest.user_key.as_ref() {
            self.pos = Position::AfterLast;
            return;
        }

        let frags = self.frags();
        let candidate = frags.partition_point(|f| f.start.as_ref() <= user_key);
        let idx = if candidate > 0 && frags[candidate - 1].end.as_ref() > user_key {
            candidate - 1
        } else {
            candidate
        };

        self.pos = if idx < self.usable.start {
            if self.usable.is_empty() {
                Position::AfterLast
            } else {
                Position::At(self.usable.start)
            }
        } else if idx >= self.usable.end {
            Position::AfterLast
        } else {
            Position::At(idx)
        };
    }

    /// Seeks to the last fragment starting at or before `user_key`; before
    /// the file's first key, positions on the `BeforeFirst` sentinel.
    pub fn seek_for_prev(&mut self, user_key: &[u8]) {
        if user_key < self.smallest.user_key.as_ref() {
            self.pos = Position::BeforeFirst;
            return;
        }

        let frags = self.frags();
        let count = frags.partition_point(|f| f.start.as_ref() <= user_key);

        self.pos = if count == 0 {
            Position::BeforeFirst
        } else {
            let idx = count - 1;
            if idx >= self.usable.end {
                if self.usable.is_empty() {
                    Position::BeforeFirst
                } else {
                    Position::At(self.usable.end - 1)
                }
            } else if idx < self.usable.start {
                Position::BeforeFirst
            } else {
                Position::At(idx)
            }
        };
    }

    /// Positions on the first fragment, or the `AfterLast` sentinel if this
    /// file carries no usable tombstones.
    pub fn seek_to_first(&mut self) {
        self.pos = if self.usable.is_empty() {
            Position::AfterLast
        } else {
            Position::At(self.usable.start)
        };
    }

    /// Positions on the last fragment, or the `BeforeFirst` sentinel if this
    /// file carries no usable tombstones.
    pub fn seek_to_last(&mut self) {
        self.pos = if self.usable.is_empty() {
            Position::BeforeFirst
        } else {
            Position::At(self.usable.end - 1)
        };
    }

    /// Advances to the next fragment, or the `AfterLast` sentinel.
    pub fn next(&mut self) {
        self.pos = match self.pos {
            Position::BeforeFirst if !self.usable.is_empty() => Position::At(self.usable.start),
            Position::At(idx) if idx + 1 < self.usable.end => Position::At(idx + 1),
            _ => Position::AfterLast,
        };
    }

    /// Steps back to the previous fragment, or the `BeforeFirst` sentinel.
    pub fn prev(&mut self) {
        self.pos = match self.pos {
            Position::AfterLast if !self.usable.is_empty() => Position::At(self.usable.end - 1),
            Position::At(idx) if idx > self.usable.start => Position::At(idx - 1),
            _ => Position::BeforeFirst,
        };
    }

    /// The internal key marking the start of the current position.
    ///
    /// At a file boundary this is the sentinel [`ValueType::RangeDeletion`]
    /// key so the merging iterator can tell it apart from a real tombstone.
    #[must_use]
    pub fn start_key(&self) -> InternalKey {
        match self.pos {
            Position::At(idx) => {
                let f = &self.frags()[idx];
                let seq = self.list.stack_of(f).first().copied().unwrap_or(0);
                InternalKey::new(f.start.clone(), seq, ValueType::RangeDelete)
            }
            Position::BeforeFirst => self.smallest.clone(),
            Position::AfterLast => InternalKey::sentinel(
                self.largest.user_key.clone(),
                crate::key::MAX_SEQUENCE_NUMBER,
            ),
        }
    }

    /// The internal key marking the (exclusive) end of the current position.
    #[must_use]
    pub fn end_key(&self) -> InternalKey {
        match self.pos {
            Position::At(idx) => {
                let f = &self.frags()[idx];
                let seq = self.list.stack_of(f).first().copied().unwrap_or(0);
                InternalKey::new(f.end.clone(), seq, ValueType::RangeDelete)
            }
            Position::BeforeFirst => self.smallest.clone(),
            Position::AfterLast => InternalKey::sentinel(
                self.largest.user_key.clone(),
                crate::key::MAX_SEQUENCE_NUMBER,
            ),
        }
    }

    /// The maximum sequence number covering the current fragment, filtered
    /// to `<= read_seqno`. `None` if no covering sequence survives the
    /// snapshot filter, or the iterator isn't on a real fragment.
    #[must_use]
    pub fn seq(&self, read_seqno: SeqNo) -> Option<SeqNo> {
        match self.pos {
            Position::At(idx) => {
                let f = &self.frags()[idx];
                self.list
                    .stack_of(f)
                    .iter()
                    .copied()
                    .find(|&s| s <= read_seqno)
            }
            _ => None,
        }
    }

    /// `true` if a tombstone at the current position covers `key` at
    /// `kv_seqno`, i.e. `kv_seqno < seq(read_seqno)`.
    #[must_use]
    pub fn covers(&self, key: &[u8], kv_seqno: SeqNo, read_seqno: SeqNo) -> bool {
        let Position::At(idx) = self.pos else {
            return false;
        };
        let f = &self.frags()[idx];
        f.start.as_ref() <= key
            && key < f.end.as_ref()
            && self.seq(read_seqno).is_some_and(|s| kv_seqno < s)
    }

    /// `true` if the current tombstone spans `key` and is visible at
    /// `read_seqno`, without comparing against any particular KV's sequence.
    ///
    /// Used by the merging iterator's cascading seek, which probes a
    /// synthetic search key rather than a real entry.
    #[must_use]
    pub fn covers_probe(&self, key: &[u8], read_seqno: SeqNo) -> bool {
        let Position::At(idx) = self.pos else {
            return false;
        };
        let f = &self.frags()[idx];
        f.start.as_ref() <= key && key < f.end.as_ref() && self.seq(read_seqno).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_tombstone::{Fragmenter, RangeTombstone};
    use crate::UserKey;
    use test_log::test;

    fn bounds(lo: &str, hi: &str) -> (InternalKey, InternalKey) {
        (
            InternalKey::new(lo, 0, ValueType::Put),
            InternalKey::new(hi, SeqNo::MAX, ValueType::Put),
        )
    }

    fn list(tombstones: Vec<(&str, &str, SeqNo)>) -> Arc<FragmentedTombstoneList> {
        Arc::new(Fragmenter::fragment(tombstones.into_iter().map(|(s, e, seq)| {
            RangeTombstone::new(UserKey::from(s), UserKey::from(e), seq)
        })))
    }

    #[test]
    fn seek_covers_scenario_b_tombstone() {
        let list = list(vec![("p", "t", 100)]);
        let (lo, hi) = bounds("p", "t");
        let mut it = TruncatedRangeDelIterator::new(list, lo, hi);

        it.seek(b"p");
        assert!(it.valid());
        assert!(it.covers(b"p", 10, SeqNo::MAX));
        assert!(it.covers(b"q", 20, SeqNo::MAX));
        assert!(it.covers(b"s", 30, SeqNo::MAX));
        assert!(!it.covers(b"t", 5, SeqNo::MAX), "end is exclusive");
    }

    #[test]
    fn seek_past_last_key_hits_after_last_sentinel() {
        let list = list(vec![("a", "b", 1)]);
        let (lo, hi) = bounds("a", "m");
        let mut it = TruncatedRangeDelIterator::new(list, lo, hi);

        it.seek(b"z");
        assert!(!it.valid());
        assert!(it.start_key().is_sentinel());
    }

    #[test]
    fn seek_before_first_key_still_finds_covering_fragment() {
        let list = list(vec![("m", "z", 1)]);
        let (lo, hi) = bounds("a", "z");
        let mut it = TruncatedRangeDelIterator::new(list, lo, hi);

        it.seek(b"a");
        assert!(it.valid());
        assert_eq!(it.start_key().user_key.as_ref(), b"m");
    }

    #[test]
    fn next_and_prev_walk_fragments() {
        let list = list(vec![("a", "b", 1), ("c", "d", 2)]);
        let (lo, hi) = bounds("a", "z");
        let mut it = TruncatedRangeDelIterator::new(list, lo, hi);

        it.seek(b"a");
        assert_eq!(it.start_key().user_key.as_ref(), b"a");
        it.next();
        assert_eq!(it.start_key().user_key.as_ref(), b"c");
        it.next();
        assert!(!it.valid());

        it.prev();
        assert_eq!(it.start_key().user_key.as_ref(), b"c");
        it.prev();
        assert_eq!(it.start_key().user_key.as_ref(), b"a");
        it.prev();
        assert!(!it.valid());
    }

    #[test]
    fn seq_filters_by_read_snapshot() {
        let list = list(vec![("a", "z", 5), ("a", "z", 15)]);
        let (lo, hi) = bounds("a", "z");
        let mut it = TruncatedRangeDelIterator::new(list, lo, hi);

        it.seek(b"k");
        assert_eq!(it.seq(20), Some(15));
        assert_eq!(it.seq(10), Some(5));
        assert_eq!(it.seq(4), None);
    }

    #[test]
    fn truncation_excludes_fragments_outside_file_bound() {
        let list = list(vec![("a", "b", 1), ("y", "z", 2)]);
        let (lo, hi) = bounds("m", "n");
        let mut it = TruncatedRangeDelIterator::new(list, lo, hi);

        it.seek(b"m");
        assert!(!it.valid(), "neither fragment overlaps [m, n]");
    }
}
