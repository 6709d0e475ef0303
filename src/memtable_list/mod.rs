// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Immutable, refcounted snapshots of the set of flushable memtables.
//!
//! A [`MemTableListVersion`] is shared via `Arc`; read paths clone the `Arc`
//! cheaply and never block on writers. Structural mutation is copy-on-write:
//! while exactly one strong reference exists the version is mutated in place
//! (via `Arc::get_mut`), otherwise a clone is built and installed.

use crate::key::{InternalKey, SeqNo, UserValue, ValueType};
use crate::memtable::{Memtable, MemtableId};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// The result of walking a [`MemTableListVersion`] for a lookup key.
#[derive(Debug, PartialEq, Eq)]
pub enum LookupResult {
    /// A `Put` was found: the definitive value.
    Found(UserValue),
    /// A `Delete`/`SingleDelete` was found: the key does not exist.
    Deleted,
    /// One or more unresolved merge operands were found, newest-first, with
    /// no base value underneath them in the memtable list.
    MergeOperands(Vec<UserValue>),
    /// No entry for this key exists in the memtable list at all.
    NotFound,
}

/// Immutable snapshot of the not-yet-flushed memtables: a `memlist` of
/// sealed-but-unflushed memtables, newest-first, plus a `memlist_history` of
/// already-flushed memtables retained for in-flight snapshot reads.
#[derive(Clone)]
pub struct MemTableListVersion {
    memlist: VecDeque<Arc<Memtable>>,
    memlist_history: VecDeque<Arc<Memtable>>,
    max_number_to_maintain: usize,
    max_bytes_to_maintain: u64,
}

impl MemTableListVersion {
    #[must_use]
    pub fn new(max_number_to_maintain: usize, max_bytes_to_maintain: u64) -> Self {
        Self {
            memlist: VecDeque::new(),
            memlist_history: VecDeque::new(),
            max_number_to_maintain,
            max_bytes_to_maintain,
        }
    }

    #[must_use]
    pub fn memlist(&self) -> &VecDeque<Arc<Memtable>> {
        &self.memlist
    }

    #[must_use]
    pub fn memlist_history(&self) -> &VecDeque<Arc<Memtable>> {
        &self.memlist_history
    }

    /// Looks up `key` at `seqno`, walking `memlist` then `memlist_history`,
    /// newest memtable first, per §4.4's `Get`.
    ///
    /// Within one memtable, every version of `key` with seqno `<= seqno` is
    /// drained (newest first) before moving to an older memtable: a memtable
    /// can itself hold a chain of `Merge` entries stacked over an older `Put`,
    /// and all of them must accumulate before the walk continues elsewhere.
    ///
    /// Each memtable's own fragmented range tombstones are consulted
    /// alongside its point entries: a tombstone covering `key` suppresses
    /// any entry (in this memtable or any older one) with a lower seqno,
    /// per [`RangeTombstone::should_suppress`](crate::RangeTombstone).
    #[must_use]
    pub fn get(&self, key: &[u8], seqno: SeqNo) -> LookupResult {
        let mut merge_operands = Vec::new();

        for memtable in self.memlist.iter().chain(self.memlist_history.iter()) {
            let tombstone_seqno = memtable
                .fragmented_tombstones()
                .and_then(|tombstones| tombstones.max_covering_seqno(key, seqno));

            for (ik, value) in memtable.get_all(key, seqno) {
                if tombstone_seqno.is_some_and(|t| ik.seqno < t) {
                    // This and every remaining (older) entry in this memtable
                    // sit below the tombstone's seqno; none of them, nor
                    // anything in an older memtable, can be visible.
                    break;
                }

                match ik.value_type {
                    ValueType::Put => {
                        if merge_operands.is_empty() {
                            return LookupResult::Found(value);
                        }
                        // A base value exists beneath pending merge operands; the
                        // caller (the storage-engine layer, out of this core's
                        // scope) is responsible for folding operands onto it.
                        merge_operands.push(value);
                        return LookupResult::MergeOperands(merge_operands);
                    }
                    ValueType::Delete | ValueType::SingleDelete => {
                        return if merge_operands.is_empty() {
                            LookupResult::Deleted
                        } else {
                            LookupResult::MergeOperands(merge_operands)
                        };
                    }
                    ValueType::Merge => merge_operands.push(value),
                    ValueType::RangeDelete | ValueType::RangeDeletion => {}
                }
            }

            if tombstone_seqno.is_some() {
                // The tombstone outranks any entry this or an older memtable
                // could still offer; nothing below it can be visible, whether
                // we broke out of the loop above or this memtable simply had
                // no entry for `key` at all.
                return if merge_operands.is_empty() {
                    LookupResult::Deleted
                } else {
                    LookupResult::MergeOperands(merge_operands)
                };
            }
        }

        if merge_operands.is_empty() {
            LookupResult::NotFound
        } else {
            LookupResult::MergeOperands(merge_operands)
        }
    }

    /// Prepends a newly sealed memtable to `memlist` (front = newest).
    fn add(&mut self, memtable: Arc<Memtable>) {
        self.memlist.push_front(memtable);
    }

    /// Removes `id` from `memlist`. If retention limits allow, it moves to
    /// the front of `memlist_history`; otherwise it is dropped (and, with it,
    /// its `Arc` reference).
    ///
    /// Returns `true` if `id` was found in `memlist`.
    fn remove(&mut self, id: MemtableId) -> bool {
        let Some(idx) = self.memlist.iter().position(|m| m.id() == id) else {
            return false;
        };

        #[expect(clippy::expect_used, reason = "idx was just located")]
        let memtable = self.memlist.remove(idx).expect("idx was just located");

        let history_bytes: u64 = self
            .memlist_history
            .iter()
            .map(|m| m.approximate_memory_usage())
            .sum();

        let would_fit_count = self.memlist_history.len() + 1 <= self.max_number_to_maintain;
        let would_fit_bytes =
            history_bytes + memtable.approximate_memory_usage() <= self.max_bytes_to_maintain;

        if would_fit_count && would_fit_bytes {
            self.memlist_history.push_front(memtable);
        }

        true
    }

    /// Discards the oldest history entries while either the retained byte
    /// budget (with `usage_hint` added) or the retained count is exceeded,
    /// per §4.4.
    fn trim_history(&mut self, usage_hint: u64) {
        loop {
            let total_bytes_excluding_last: u64 = self
                .memlist_history
                .iter()
                .rev()
                .skip(1)
                .map(|m| m.approximate_memory_usage())
                .sum();

            let over_bytes = total_bytes_excluding_last + usage_hint >= self.max_bytes_to_maintain;
            let over_count =
                self.memlist.len() + self.memlist_history.len() > self.max_number_to_maintain;

            if !(over_bytes || over_count) || self.memlist_history.is_empty() {
                break;
            }

            self.memlist_history.pop_back();
        }
    }

    #[must_use]
    pub fn total_memory_usage(&self) -> u64 {
        self.memlist
            .iter()
            .chain(self.memlist_history.iter())
            .map(|m| m.approximate_memory_usage())
            .sum()
    }
}

/// Owns the current [`MemTableListVersion`] and mediates copy-on-write
/// mutation, per §4.4's `Add`/`Remove`/`TrimHistory` contract.
pub struct MemTableList {
    current: RwLock<Arc<MemTableListVersion>>,
}

impl MemTableList {
    #[must_use]
    pub fn new(max_number_to_maintain: usize, max_bytes_to_maintain: u64) -> Self {
        Self {
            current: RwLock::new(Arc::new(MemTableListVersion::new(
                max_number_to_maintain,
                max_bytes_to_maintain,
            ))),
        }
    }

    /// Returns a cheap `Arc` clone of the current version for reads.
    ///
    /// # Panics
    /// Panics on lock poisoning.
    #[must_use]
    pub fn current(&self) -> Arc<MemTableListVersion> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.current.read().expect("lock poisoned").clone()
    }

    /// Applies `mutate` to the current version, mutating in place if this is
    /// the sole strong reference, or installing a cloned-and-mutated version
    /// otherwise (the copy-on-write realized without locking readers out).
    ///
    /// # Panics
    /// Panics on lock poisoning.
    fn install(&self, mutate: impl FnOnce(&mut MemTableListVersion)) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut guard = self.current.write().expect("lock poisoned");

        if let Some(version) = Arc::get_mut(&mut guard) {
            mutate(version);
        } else {
            let mut next = (**guard).clone();
            mutate(&mut next);
            *guard = Arc::new(next);
        }
    }

    pub fn add(&self, memtable: Arc<Memtable>) {
        self.install(|v| v.add(memtable));
    }

    pub fn remove(&self, id: MemtableId) -> bool {
        let mut removed = false;
        self.install(|v| removed = v.remove(id));
        removed
    }

    pub fn trim_history(&self, usage_hint: u64) {
        self.install(|v| v.trim_history(usage_hint));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ValueType;
    use test_log::test;

    fn sealed(id: MemtableId, items: &[(&str, u64, ValueType, &str)]) -> Arc<Memtable> {
        let memtable = Memtable::new(id, 0);
        for (key, seq, ty, value) in items {
            memtable.insert(InternalKey::new(*key, *seq, *ty), UserValue::from(*value));
        }
        memtable.seal();
        Arc::new(memtable)
    }

    #[test]
    fn newest_memtable_wins_on_get() {
        let list = MemTableList::new(10, 1 << 20);
        list.add(sealed(0, &[("k", 1, ValueType::Put, "old")]));
        list.add(sealed(1, &[("k", 2, ValueType::Put, "new")]));

        match list.current().get(b"k", SeqNo::MAX) {
            LookupResult::Found(v) => assert_eq!(v.as_ref(), b"new"),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn merge_operands_accumulate_until_base_value() {
        let list = MemTableList::new(10, 1 << 20);
        list.add(sealed(0, &[("k", 1, ValueType::Put, "base")]));
        list.add(sealed(1, &[("k", 2, ValueType::Merge, "op1")]));
        list.add(sealed(2, &[("k", 3, ValueType::Merge, "op2")]));

        match list.current().get(b"k", SeqNo::MAX) {
            LookupResult::MergeOperands(ops) => {
                let ops: Vec<&[u8]> = ops.iter().map(AsRef::as_ref).collect();
                assert_eq!(ops, vec![b"op2".as_slice(), b"op1".as_slice(), b"base".as_slice()]);
            }
            other => panic!("expected MergeOperands, got {other:?}"),
        }
    }

    #[test]
    fn merge_operands_accumulate_within_a_single_memtable() {
        // Unlike `merge_operands_accumulate_until_base_value`, every version
        // of `k` here lives in the *same* memtable, so `get` must drain that
        // memtable's whole chain before it would even consider an older one.
        let list = MemTableList::new(10, 1 << 20);
        list.add(sealed(
            0,
            &[
                ("k", 3, ValueType::Merge, "op2"),
                ("k", 2, ValueType::Merge, "op1"),
                ("k", 1, ValueType::Put, "base"),
            ],
        ));

        match list.current().get(b"k", SeqNo::MAX) {
            LookupResult::MergeOperands(ops) => {
                let ops: Vec<&[u8]> = ops.iter().map(AsRef::as_ref).collect();
                assert_eq!(ops, vec![b"op2".as_slice(), b"op1".as_slice(), b"base".as_slice()]);
            }
            other => panic!("expected MergeOperands, got {other:?}"),
        }
    }

    #[test]
    fn delete_shadows_older_put() {
        let list = MemTableList::new(10, 1 << 20);
        list.add(sealed(0, &[("k", 1, ValueType::Put, "v")]));
        list.add(sealed(1, &[("k", 2, ValueType::Delete, "")]));

        assert_eq!(list.current().get(b"k", SeqNo::MAX), LookupResult::Deleted);
    }

    #[test]
    fn remove_moves_memtable_to_history_within_limits() {
        let list = MemTableList::new(10, 1 << 20);
        list.add(sealed(0, &[("k", 1, ValueType::Put, "v")]));

        assert!(list.remove(0));
        let version = list.current();
        assert!(version.memlist().is_empty());
        assert_eq!(version.memlist_history().len(), 1);
    }

    #[test]
    fn remove_drops_memtable_when_history_is_full() {
        let list = MemTableList::new(0, 1 << 20);
        list.add(sealed(0, &[("k", 1, ValueType::Put, "v")]));

        assert!(list.remove(0));
        assert!(list.current().memlist_history().is_empty());
    }

    #[test]
    fn trim_history_respects_byte_budget() {
        let list = MemTableList::new(10, 32);
        list.add(sealed(0, &[("a", 1, ValueType::Put, "aaaaaaaaaaaaaaaaaaaa")]));
        list.remove(0);
        assert_eq!(list.current().memlist_history().len(), 1);

        list.trim_history(1_000);
        assert!(list.current().memlist_history().is_empty());
    }

    #[test]
    fn range_tombstone_suppresses_older_put_but_not_newer_one() {
        let list = MemTableList::new(10, 1 << 20);

        let memtable = Memtable::new(0, 0);
        memtable.insert(InternalKey::new("k", 5, ValueType::Put), UserValue::from("v1"));
        memtable.insert_range_tombstone(crate::RangeTombstone::new(
            "k".into(),
            "l".into(),
            10,
        ));
        memtable.insert(InternalKey::new("k", 15, ValueType::Put), UserValue::from("v2"));
        memtable.seal();
        list.add(Arc::new(memtable));

        match list.current().get(b"k", 7) {
            LookupResult::Found(v) => assert_eq!(v.as_ref(), b"v1"),
            other => panic!("expected Found(v1), got {other:?}"),
        }
        assert_eq!(list.current().get(b"k", 12), LookupResult::Deleted);
        match list.current().get(b"k", 20) {
            LookupResult::Found(v) => assert_eq!(v.as_ref(), b"v2"),
            other => panic!("expected Found(v2), got {other:?}"),
        }
    }

    #[test]
    fn copy_on_write_does_not_mutate_outstanding_snapshot() {
        let list = MemTableList::new(10, 1 << 20);
        list.add(sealed(0, &[("k", 1, ValueType::Put, "v")]));

        let snapshot = list.current();
        assert_eq!(snapshot.memlist().len(), 1);

        list.add(sealed(1, &[("k2", 2, ValueType::Put, "v2")]));

        assert_eq!(snapshot.memlist().len(), 1, "old snapshot must be unaffected");
        assert_eq!(list.current().memlist().len(), 2);
    }
}
