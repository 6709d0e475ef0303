// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Range tombstones, their fragmentation into non-overlapping stacks, and a
//! truncated iterator bounding a fragmented list to one sorted run's key range.

pub mod fragmenter;
pub mod truncated_iter;

pub use fragmenter::{FragmentedTombstoneList, Fragmenter};
pub use truncated_iter::TruncatedRangeDelIterator;

use crate::{SeqNo, UserKey};
use std::cmp::Reverse;

/// A range tombstone that deletes all keys in `[start, end)` at a given sequence number.
///
/// Half-open interval: `start` is inclusive, `end` is exclusive. A key `k` is
/// covered iff `start <= k < end` and `k`'s own sequence number is `< seqno`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RangeTombstone {
    /// Inclusive start bound.
    pub start: UserKey,
    /// Exclusive end bound.
    pub end: UserKey,
    /// Sequence number at which this tombstone was written.
    pub seqno: SeqNo,
}

impl RangeTombstone {
    /// Creates a new range tombstone for `[start, end)` at the given seqno.
    ///
    /// # Panics (debug only)
    /// Debug-asserts that `start < end`. Callers must validate untrusted input
    /// before constructing a `RangeTombstone`.
    pub fn new(start: UserKey, end: UserKey, seqno: SeqNo) -> Self {
        debug_assert!(start < end, "range tombstone start must be < end");
        Self { start, end, seqno }
    }

    /// Returns `true` if `key` is within `[start, end)`.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.start.as_ref() <= key && key < self.end.as_ref()
    }

    /// Returns `true` if this tombstone should suppress a KV with the given
    /// sequence number: `kv_seqno < self.seqno AND self.contains_key(key)`.
    #[must_use]
    pub fn should_suppress(&self, key: &[u8], kv_seqno: SeqNo) -> bool {
        self.contains_key(key) && kv_seqno < self.seqno
    }
}

/// Ordered by `(start asc, seqno desc, end asc)`.
///
/// The `end` tiebreaker gives deterministic ordering when two tombstones
/// share a start and seqno, which the fragmenter's sweep relies on.
impl Ord for RangeTombstone {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.start, Reverse(self.seqno), &self.end).cmp(&(
            &other.start,
            Reverse(other.seqno),
            &other.end,
        ))
    }
}

impl PartialOrd for RangeTombstone {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
