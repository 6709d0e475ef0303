// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Serializes concurrent flush completions into manifest-commit order.
//!
//! Multiple flush workers may finish at the same time, but manifest edits
//! must land in memtable-creation order. A single `commit_in_progress` flag
//! ensures at most one committer drains the list at a time; everyone else's
//! completion is simply recorded and picked up by whichever thread currently
//! holds the flag.

use crate::memtable::{EditRecord, MemtableId};
use crate::memtable_list::MemTableList;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A manifest commit produced by draining one contiguous run of completed
/// flushes from the front of the immutable list.
#[derive(Debug, PartialEq, Eq)]
pub struct CommitBatch {
    /// Memtable ids removed by this batch, in creation order.
    pub memtable_ids: Vec<MemtableId>,
    /// The combined edit across every distinct destination file number in
    /// this batch's run, concatenated in creation order, per §4.5.
    pub edit: EditRecord,
    /// `true` if this batch is part of an atomic multi-column-family group
    /// and should be tagged with a descending remaining-members counter so
    /// manifest replay rejects a partial group.
    pub atomic_group_remaining: Option<u32>,
}

/// Trait a column family's manifest-commit sink implements; kept abstract
/// since manifest on-disk layout is outside this core's scope.
pub trait ManifestSink {
    /// Applies a batch's edits. Releases and reacquires no locks itself —
    /// the caller is responsible for dropping its coordinating mutex around
    /// this call, matching §4.5's "releasing and reacquiring the
    /// coordinating mutex around the I/O".
    fn commit(&self, batch: &CommitBatch) -> crate::Result<()>;
}

/// `true` if the column family backing this installer has been dropped.
///
/// When dropped, flushed memtables are *not* unlinked from the memtable
/// list on successful commit, since outstanding iterators on the dropped
/// family must keep reading them (§4.5's last invariant).
pub trait DropState {
    fn is_dropped(&self) -> bool;
}

pub struct FlushInstaller {
    commit_in_progress: AtomicBool,
    /// Guards the scan-and-commit critical section; distinct from
    /// `commit_in_progress` so a second committer can observe "someone is
    /// already draining" without blocking on the mutex itself.
    drain_lock: Mutex<()>,
    /// Set by [`Self::begin_atomic_group`], consumed by the next batch this
    /// installer commits. A caller coordinating an atomic flush across
    /// several column families calls this on each family's installer with a
    /// shared descending counter before triggering their flushes, so every
    /// resulting `CommitBatch` is tagged with how many group members are
    /// still outstanding; manifest replay can then reject a partial group.
    pending_atomic_group: Mutex<Option<u32>>,
    #[cfg(feature = "metrics")]
    telemetry: std::sync::Arc<dyn crate::telemetry::TelemetrySink>,
}

impl Default for FlushInstaller {
    fn default() -> Self {
        Self::new(
            #[cfg(feature = "metrics")]
            std::sync::Arc::new(crate::telemetry::NoopTelemetrySink),
        )
    }
}

impl FlushInstaller {
    #[must_use]
    pub fn new(
        #[cfg(feature = "metrics")] telemetry: std::sync::Arc<dyn crate::telemetry::TelemetrySink>,
    ) -> Self {
        Self {
            commit_in_progress: AtomicBool::new(false),
            drain_lock: Mutex::new(()),
            pending_atomic_group: Mutex::new(None),
            #[cfg(feature = "metrics")]
            telemetry,
        }
    }

    /// Marks the next batch this installer commits as one member of an
    /// atomic multi-column-family flush group with `remaining` members
    /// (including this one) left to land. Cleared once consumed.
    ///
    /// # Panics
    /// Panics on lock poisoning.
    pub fn begin_atomic_group(&self, remaining: u32) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut guard = self.pending_atomic_group.lock().expect("lock poisoned");
        *guard = Some(remaining);
    }

    /// Called by a flush worker (or a thread that just marked one
    /// `flush_completed`) to try to become the committer and drain as many
    /// contiguous completed flushes as are available.
    ///
    /// If another thread is already committing, this call is a no-op: that
    /// thread will observe the newly completed memtable on its next scan.
    ///
    /// # Panics
    /// Panics on lock poisoning.
    pub fn try_install<S: ManifestSink, D: DropState>(
        &self,
        memlist: &MemTableList,
        sink: &S,
        drop_state: &D,
    ) -> crate::Result<()> {
        if self
            .commit_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let _drain_guard = self.drain_lock.lock().expect("lock poisoned");

        let result = self.drain_loop(memlist, sink, drop_state);

        self.commit_in_progress.store(false, Ordering::Release);
        result
    }

    fn drain_loop<S: ManifestSink, D: DropState>(
        &self,
        memlist: &MemTableList,
        sink: &S,
        drop_state: &D,
    ) -> crate::Result<()> {
        loop {
            let version = memlist.current();

            // Oldest completed memtables sit at the back of `memlist` (front
            // is newest); scan from the oldest end for a contiguous run of
            // `flush_completed` memtables. The run can span several distinct
            // destination file numbers (one flush job per file number), so
            // group by `file_number` and combine every group's own edit into
            // one commit, rather than keeping only the very first memtable's
            // edit.
            let mut batch_ids = Vec::new();
            let mut combined_new_files = Vec::new();
            let mut last_file_number = None;

            for memtable in version.memlist().iter().rev() {
                if !memtable.is_flush_completed() {
                    break;
                }

                let file_number = memtable.file_number();
                if last_file_number != Some(file_number) {
                    combined_new_files.extend(memtable.edit_record().new_files);
                    last_file_number = Some(file_number);
                } else {
                    debug_assert!(
                        memtable.edit_record().is_empty(),
                        "only the first memtable sharing a file_number carries that file's edit record"
                    );
                }

                batch_ids.push(memtable.id());
            }

            if batch_ids.is_empty() {
                return Ok(());
            }

            let batch_edit = EditRecord {
                new_files: combined_new_files,
            };

            // Creation order: ids were collected oldest-to-newest already,
            // since we scanned from the back (oldest) forward.
            let atomic_group_remaining = {
                #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
                let mut guard = self.pending_atomic_group.lock().expect("lock poisoned");
                guard.take()
            };

            let batch = CommitBatch {
                memtable_ids: batch_ids,
                edit: batch_edit,
                atomic_group_remaining,
            };

            match sink.commit(&batch) {
                Ok(()) => {
                    log::debug!(
                        "installed flush batch {:?}, {} new file(s)",
                        batch.memtable_ids,
                        batch.edit.new_files.len()
                    );
                    #[cfg(feature = "metrics")]
                    self.telemetry.on_flush_installed(batch.memtable_ids.len());
                    if drop_state.is_dropped() {
                        // Outstanding iterators on the dropped family may
                        // still read these memtables, so they stay linked
                        // rather than being unlinked here. Nothing else
                        // about `memlist` changes by committing again, so
                        // stop draining instead of recommitting the same
                        // batch forever.
                        return Ok(());
                    }
                    for id in &batch.memtable_ids {
                        memlist.remove(*id);
                    }
                }
                Err(e) => {
                    log::warn!("flush batch {:?} failed to commit: {e:?}", batch.memtable_ids);
                    for id in &batch.memtable_ids {
                        if let Some(m) = version.memlist().iter().find(|m| m.id() == *id) {
                            m.rollback_flush();
                        }
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{InternalKey, UserValue, ValueType};
    use crate::memtable::{FileMetadata, Memtable};
    use std::sync::Arc;
    use test_log::test;

    struct RecordingSink {
        batches: Mutex<Vec<CommitBatch>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    impl ManifestSink for RecordingSink {
        fn commit(&self, batch: &CommitBatch) -> crate::Result<()> {
            self.batches.lock().unwrap().push(CommitBatch {
                memtable_ids: batch.memtable_ids.clone(),
                edit: batch.edit.clone(),
                atomic_group_remaining: batch.atomic_group_remaining,
            });
            Ok(())
        }
    }

    struct NotDropped;
    impl DropState for NotDropped {
        fn is_dropped(&self) -> bool {
            false
        }
    }

    struct AlwaysDropped;
    impl DropState for AlwaysDropped {
        fn is_dropped(&self) -> bool {
            true
        }
    }

    fn make_memtable(id: u64) -> Arc<Memtable> {
        let m = Memtable::new(id, 0);
        m.insert(
            InternalKey::new("k", id, ValueType::Put),
            UserValue::from("v"),
        );
        m.seal();
        Arc::new(m)
    }

    #[test]
    fn commits_contiguous_completed_batch_in_creation_order() {
        let memlist = MemTableList::new(10, 1 << 20);

        let m0 = make_memtable(0);
        let m1 = make_memtable(1);
        memlist.add(m0.clone());
        memlist.add(m1.clone());
        // front = m1 (newest), back = m0 (oldest)

        m0.complete_flush(
            100,
            EditRecord {
                new_files: vec![FileMetadata {
                    file_number: 100,
                    smallest: InternalKey::new("k", 0, ValueType::Put),
                    largest: InternalKey::new("k", 0, ValueType::Put),
                }],
            },
        );
        m1.complete_flush(101, EditRecord::empty());

        #[cfg(feature = "metrics")]
        let telemetry: Arc<dyn crate::telemetry::TelemetrySink> =
            Arc::new(crate::telemetry::NoopTelemetrySink);
        let installer = FlushInstaller::new(
            #[cfg(feature = "metrics")]
            telemetry,
        );
        let sink = RecordingSink::new();
        installer
            .try_install(&memlist, &sink, &NotDropped)
            .unwrap();

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].memtable_ids, vec![0, 1]);
        assert_eq!(batches[0].edit.new_files.len(), 1);

        assert!(memlist.current().memlist().is_empty());
    }

    #[test]
    fn stops_batch_at_first_incomplete_memtable() {
        let memlist = MemTableList::new(10, 1 << 20);
        let m0 = make_memtable(0);
        let m1 = make_memtable(1);
        memlist.add(m0.clone());
        memlist.add(m1);

        m0.complete_flush(100, EditRecord::empty());
        // m1 not completed.

        #[cfg(feature = "metrics")]
        let telemetry: Arc<dyn crate::telemetry::TelemetrySink> =
            Arc::new(crate::telemetry::NoopTelemetrySink);
        let installer = FlushInstaller::new(
            #[cfg(feature = "metrics")]
            telemetry,
        );
        let sink = RecordingSink::new();
        installer
            .try_install(&memlist, &sink, &NotDropped)
            .unwrap();

        assert_eq!(sink.batches.lock().unwrap()[0].memtable_ids, vec![0]);
        assert_eq!(memlist.current().memlist_history().len(), 1);
    }

    #[test]
    fn atomic_group_tag_is_attached_once_then_cleared() {
        let memlist = MemTableList::new(10, 1 << 20);
        let m0 = make_memtable(0);
        let m1 = make_memtable(1);
        memlist.add(m0.clone());
        m0.complete_flush(100, EditRecord::empty());

        #[cfg(feature = "metrics")]
        let telemetry: Arc<dyn crate::telemetry::TelemetrySink> =
            Arc::new(crate::telemetry::NoopTelemetrySink);
        let installer = FlushInstaller::new(
            #[cfg(feature = "metrics")]
            telemetry,
        );
        let sink = RecordingSink::new();
        installer.begin_atomic_group(2);
        installer.try_install(&memlist, &sink, &NotDropped).unwrap();

        assert_eq!(sink.batches.lock().unwrap()[0].atomic_group_remaining, Some(2));

        memlist.add(m1.clone());
        m1.complete_flush(101, EditRecord::empty());
        installer.try_install(&memlist, &sink, &NotDropped).unwrap();

        assert_eq!(
            sink.batches.lock().unwrap()[1].atomic_group_remaining,
            None,
            "the tag is consumed by the first batch and must not leak into the next"
        );
    }

    #[test]
    fn dropped_column_family_keeps_memtables_after_commit() {
        let memlist = MemTableList::new(10, 1 << 20);
        let m0 = make_memtable(0);
        memlist.add(m0.clone());
        m0.complete_flush(100, EditRecord::empty());

        #[cfg(feature = "metrics")]
        let telemetry: Arc<dyn crate::telemetry::TelemetrySink> =
            Arc::new(crate::telemetry::NoopTelemetrySink);
        let installer = FlushInstaller::new(
            #[cfg(feature = "metrics")]
            telemetry,
        );
        let sink = RecordingSink::new();
        installer
            .try_install(&memlist, &sink, &AlwaysDropped)
            .unwrap();

        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        assert_eq!(memlist.current().memlist().len(), 1, "not unlinked on dropped CF");
    }
}
