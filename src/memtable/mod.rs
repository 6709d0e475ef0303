// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The memtable serves as an intermediary, ephemeral, sorted storage for new items.
//!
//! When a memtable exceeds some size, it is sealed (made immutable) and handed
//! to the [`crate::memtable_list`] for flushing.

use crate::key::{InternalKey, SeqNo, UserValue};
use crate::range_tombstone::{Fragmenter, FragmentedTombstoneList, RangeTombstone};
use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Monotonically increasing memtable creation id.
///
/// Doubles as the manifest commit order: the flush installer applies edits
/// in ascending `MemtableId` order regardless of flush completion order.
pub type MemtableId = u64;

/// The set of file additions that will materialize a memtable on disk once
/// its flush completes.
///
/// On-disk byte layout is out of this core's scope; only the bookkeeping a
/// flush installer needs (file identity and key bounds) is represented.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    pub file_number: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

/// The manifest edit a flushed memtable contributes: the files it produced.
///
/// Per §4.5, only the first memtable *sharing a given destination file
/// number* within a contiguous flushed batch carries that file's non-empty
/// edit record; the rest carry [`EditRecord::empty`]. A batch spanning
/// several distinct file numbers therefore combines several memtables' own
/// non-empty edits, one per file number, into the commit's combined edit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EditRecord {
    pub new_files: Vec<FileMetadata>,
}

impl EditRecord {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty()
    }
}

/// A sorted, append-only, in-memory key/value store.
pub struct Memtable {
    id: MemtableId,

    /// The actual content, stored in a lock-free skiplist.
    items: SkipMap<InternalKey, UserValue>,

    /// Range-delete records inserted so far, unfragmented.
    ///
    /// Fragmented lazily on [`Memtable::seal`], since `FragmentedTombstoneList`
    /// is an immutable, build-once structure and the memtable accepts writes
    /// until sealed.
    pending_tombstones: RwLock<Vec<RangeTombstone>>,

    /// Populated by `seal()`; `None` while the memtable is still mutable.
    fragmented_tombstones: RwLock<Option<Arc<FragmentedTombstoneList>>>,

    /// Approximate active memtable size in bytes.
    approximate_size: AtomicU64,

    /// Highest encountered sequence number; kept so `highest_seqno` is O(1).
    highest_seqno: AtomicU64,

    /// WAL pointer: writes up to (but not including) this log number are
    /// covered by this memtable's contents.
    next_log_number: AtomicU64,

    edit_record: RwLock<EditRecord>,

    flush_in_progress: AtomicBool,
    flush_completed: AtomicBool,

    /// 0 until flushed.
    file_number: AtomicU64,

    sealed: AtomicBool,
}

impl Memtable {
    #[must_use]
    pub fn new(id: MemtableId, next_log_number: u64) -> Self {
        Self {
            id,
            items: SkipMap::default(),
            pending_tombstones: RwLock::new(Vec::new()),
            fragmented_tombstones: RwLock::new(None),
            approximate_size: AtomicU64::default(),
            highest_seqno: AtomicU64::default(),
            next_log_number: AtomicU64::new(next_log_number),
            edit_record: RwLock::new(EditRecord::empty()),
            flush_in_progress: AtomicBool::default(),
            flush_completed: AtomicBool::default(),
            file_number: AtomicU64::default(),
            sealed: AtomicBool::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> MemtableId {
        self.id
    }

    #[must_use]
    pub fn next_log_number(&self) -> u64 {
        self.next_log_number.load(Ordering::Acquire)
    }

    /// Inserts an item, returning `(item_size, approximate_size_after)`.
    ///
    /// # Panics
    /// Panics if the memtable has already been [`Memtable::seal`]ed.
    pub fn insert(&self, key: InternalKey, value: UserValue) -> (u64, u64) {
        assert!(!self.is_sealed(), "cannot write to a sealed memtable");

        #[expect(
            clippy::cast_possible_truncation,
            reason = "keys are limited to 16-bit length, values to 32-bit length"
        )]
        let item_size = (key.user_key.len() + value.len() + 24) as u64;

        let size_before = self
            .approximate_size
            .fetch_add(item_size, Ordering::AcqRel);

        self.highest_seqno.fetch_max(key.seqno, Ordering::AcqRel);
        self.items.insert(key, value);

        (item_size, size_before + item_size)
    }

    /// Inserts a range tombstone, to be fragmented with the rest on `seal()`.
    ///
    /// # Panics
    /// Panics if the memtable has already been sealed, or on lock poisoning.
    pub fn insert_range_tombstone(&self, rt: RangeTombstone) {
        assert!(!self.is_sealed(), "cannot write to a sealed memtable");

        let size_contribution = (rt.start.len() + rt.end.len() + 16) as u64;
        self.approximate_size
            .fetch_add(size_contribution, Ordering::AcqRel);
        self.highest_seqno.fetch_max(rt.seqno, Ordering::AcqRel);

        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.pending_tombstones
            .write()
            .expect("lock poisoned")
            .push(rt);
    }

    /// Seals the memtable: no further writes are accepted, and its range
    /// tombstones are fragmented once for read-side consumption.
    ///
    /// Idempotent.
    ///
    /// # Panics
    /// Panics on lock poisoning.
    pub fn seal(&self) {
        #[cfg(feature = "metrics")]
        self.seal_with_telemetry(&crate::telemetry::NoopTelemetrySink);
        #[cfg(not(feature = "metrics"))]
        self.seal_impl();
    }

    /// Same as [`Self::seal`], additionally reporting the fragmented
    /// tombstone count through `telemetry`.
    ///
    /// # Panics
    /// Panics on lock poisoning.
    #[cfg(feature = "metrics")]
    pub fn seal_with_telemetry(&self, telemetry: &dyn crate::telemetry::TelemetrySink) {
        let Some(fragmented_len) = self.seal_impl() else {
            return;
        };
        telemetry.on_tombstone_fragmented(fragmented_len);
    }

    /// Does the actual sealing work; returns the fragmented tombstone count
    /// on the call that actually performed the seal, `None` if the memtable
    /// was already sealed.
    fn seal_impl(&self) -> Option<usize> {
        if self.sealed.swap(true, Ordering::AcqRel) {
            return None;
        }

        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let pending = std::mem::take(&mut *self.pending_tombstones.write().expect("lock poisoned"));
        let fragmented = Fragmenter::fragment(pending);
        let fragmented_len = fragmented.len();

        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        {
            *self.fragmented_tombstones.write().expect("lock poisoned") = Some(Arc::new(fragmented));
        }

        Some(fragmented_len)
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// The fragmented tombstone list, if the memtable has been sealed.
    ///
    /// # Panics
    /// Panics on lock poisoning.
    #[must_use]
    pub fn fragmented_tombstones(&self) -> Option<Arc<FragmentedTombstoneList>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.fragmented_tombstones
            .read()
            .expect("lock poisoned")
            .clone()
    }

    /// Returns the newest item for `key` with seqno `<= seqno`.
    pub fn get(&self, key: &[u8], seqno: SeqNo) -> Option<(InternalKey, UserValue)> {
        self.get_all(key, seqno).into_iter().next()
    }

    /// Returns every version of `key` with seqno `<= seqno`, newest first, as
    /// found in this memtable alone. Feeds [`crate::memtable_list`]'s
    /// cross-memtable merge-operand accumulation, which must drain a
    /// memtable's own chain of `Merge` entries for a key before moving to an
    /// older memtable.
    #[must_use]
    pub fn get_all(&self, key: &[u8], seqno: SeqNo) -> Vec<(InternalKey, UserValue)> {
        if seqno == 0 {
            return Vec::new();
        }

        // InternalKeys sort by (user_key asc, seqno desc); the lowest key
        // greater-or-equal to `(key, seqno)` is the newest version visible at
        // `seqno`, if its user_key still matches. `ValueType::Put` is used as
        // the bound's type tag purely as a sentinel that sorts after every
        // real type at the same seqno, so the comparison only hinges on
        // seqno here.
        let lower_bound = InternalKey::new(key, seqno, crate::key::ValueType::Put);

        self.items
            .range(lower_bound..)
            .take_while(|entry| entry.key().user_key.as_ref() == key)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Iterates over all items in ascending key order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (InternalKey, UserValue)> + '_ {
        self.items
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Approximate memtable size in bytes, including range tombstones.
    #[must_use]
    pub fn approximate_memory_usage(&self) -> u64 {
        self.approximate_size.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn get_highest_seqno(&self) -> Option<SeqNo> {
        if self.is_empty() {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let no_tombstones = self.pending_tombstones.read().expect("lock poisoned").is_empty()
                && self
                    .fragmented_tombstones()
                    .is_none_or(|t| t.is_empty());
            if no_tombstones {
                return None;
            }
        }
        Some(self.highest_seqno.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_flush_in_progress(&self) -> bool {
        self.flush_in_progress.load(Ordering::Acquire)
    }

    pub fn set_flush_in_progress(&self, value: bool) {
        self.flush_in_progress.store(value, Ordering::Release);
    }

    #[must_use]
    pub fn is_flush_completed(&self) -> bool {
        self.flush_completed.load(Ordering::Acquire)
    }

    /// Marks the flush completed, recording the destination file number and
    /// the edit record the flush installer will apply.
    ///
    /// # Panics
    /// Panics on lock poisoning.
    pub fn complete_flush(&self, file_number: u64, edit: EditRecord) {
        self.file_number.store(file_number, Ordering::Release);
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        {
            *self.edit_record.write().expect("lock poisoned") = edit;
        }
        self.flush_completed.store(true, Ordering::Release);
    }

    /// Rolls a failed flush attempt back to `IMMUTABLE`, per the §4.4 state
    /// diagram's `(rolled back on failure)` edge.
    ///
    /// Called after a manifest commit fails, which is always *after*
    /// [`Self::complete_flush`] already ran — so this also undoes that
    /// call's `flush_completed`/`file_number`/`edit_record`, not just
    /// `flush_in_progress`, or the memtable would be left outside the
    /// documented state machine (completed but not in progress) and could
    /// be flushed a second time, overwriting the first flush's metadata.
    ///
    /// # Panics
    /// Panics on lock poisoning.
    pub fn rollback_flush(&self) {
        self.flush_in_progress.store(false, Ordering::Release);
        self.flush_completed.store(false, Ordering::Release);
        self.file_number.store(0, Ordering::Release);
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        {
            *self.edit_record.write().expect("lock poisoned") = EditRecord::empty();
        }
    }

    #[must_use]
    pub fn file_number(&self) -> u64 {
        self.file_number.load(Ordering::Acquire)
    }

    /// # Panics
    /// Panics on lock poisoning.
    #[must_use]
    pub fn edit_record(&self) -> EditRecord {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.edit_record.read().expect("lock poisoned").clone()
    }
}
