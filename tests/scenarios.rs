//! Integration tests exercising the literal end-to-end scenarios.

use lsm_core::flush_installer::{CommitBatch, DropState, ManifestSink};
use lsm_core::merge::VecIterator;
use lsm_core::{
    EditRecord, FileMetadata, FlushInstaller, Fragmenter, InternalIterator, InternalKey, Level,
    Memtable, MemTableList, MergingIterator, RangeTombstone, UserValue, ValueType,
};
use std::sync::Mutex;

// Scenario A: fragmenter.
#[test]
fn scenario_a_fragmenter() {
    let tombstones = vec![
        RangeTombstone::new("a".into(), "c".into(), 5),
        RangeTombstone::new("b".into(), "d".into(), 3),
        RangeTombstone::new("b".into(), "c".into(), 7),
    ];

    let fragmented = Fragmenter::fragment(tombstones);
    assert_eq!(fragmented.len(), 3);

    let covering = fragmented.max_covering_seqno(b"b", lsm_core::MAX_SEQUENCE_NUMBER);
    assert_eq!(covering, Some(7));
}

// Scenario B: cascading seek across two levels.
#[test]
fn scenario_b_cascading_seek() {
    let l0_tombstones = Fragmenter::fragment(vec![RangeTombstone::new("p".into(), "t".into(), 100)]);

    let l0: Box<dyn InternalIterator + Send> = Box::new(VecIterator::new(vec![]));
    let l1_items = vec![
        (InternalKey::new("p", 10, ValueType::Put), UserValue::from("p")),
        (InternalKey::new("q", 20, ValueType::Put), UserValue::from("q")),
        (InternalKey::new("s", 30, ValueType::Put), UserValue::from("s")),
        (InternalKey::new("t", 5, ValueType::Put), UserValue::from("t")),
    ];
    let l1: Box<dyn InternalIterator + Send> = Box::new(VecIterator::new(l1_items));

    let bounds_start = InternalKey::new("p", lsm_core::MAX_SEQUENCE_NUMBER, ValueType::Put);
    let bounds_end = InternalKey::new("t", 0, ValueType::Put);
    let tombstones = lsm_core::TruncatedRangeDelIterator::new(
        std::sync::Arc::new(l0_tombstones),
        bounds_start,
        bounds_end,
    );

    let levels = vec![
        Level::with_tombstones(l0, tombstones),
        Level::new(l1),
    ];

    let mut iter = MergingIterator::new(levels, u64::MAX);
    iter.seek(&InternalKey::new("p", u64::MAX, ValueType::Put));

    assert!(iter.valid());
    assert_eq!(iter.key().user_key.as_ref(), b"t");
    assert_eq!(iter.key().seqno, 5);
}

// Scenario C: flush install ordering — B, C never commit while A is not.
#[test]
fn scenario_c_flush_install_ordering() {
    struct RecordingSink {
        batches: Mutex<Vec<CommitBatch>>,
    }
    impl ManifestSink for RecordingSink {
        fn commit(&self, batch: &CommitBatch) -> lsm_core::Result<()> {
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

    let memlist = MemTableList::new(10, 1 << 20);
    let make = |id: u64| {
        let m = Memtable::new(id, 0);
        m.insert(InternalKey::new("k", id, ValueType::Put), UserValue::from("v"));
        m.seal();
        std::sync::Arc::new(m)
    };

    let a = make(0);
    let b = make(1);
    let c = make(2);
    memlist.add(a.clone());
    memlist.add(b.clone());
    memlist.add(c.clone());

    let file_meta = |file_number: u64| FileMetadata {
        file_number,
        smallest: InternalKey::new("k", file_number, ValueType::Put),
        largest: InternalKey::new("k", file_number, ValueType::Put),
    };

    // B and C flush to distinct file numbers (11, 12), each carrying its own
    // edit record, not `EditRecord::empty()` — a contiguous run can span
    // several distinct destination files, one flush job per file number.
    b.complete_flush(
        11,
        EditRecord {
            new_files: vec![file_meta(11)],
        },
    );
    c.complete_flush(
        12,
        EditRecord {
            new_files: vec![file_meta(12)],
        },
    );
    // A not yet completed: nothing should commit.

    #[cfg(feature = "metrics")]
    let telemetry: std::sync::Arc<dyn lsm_core::telemetry::TelemetrySink> =
        std::sync::Arc::new(lsm_core::telemetry::NoopTelemetrySink);
    let installer = FlushInstaller::new(
        #[cfg(feature = "metrics")]
        telemetry,
    );
    let sink = RecordingSink {
        batches: Mutex::new(Vec::new()),
    };
    installer.try_install(&memlist, &sink, &NotDropped).unwrap();
    assert!(sink.batches.lock().unwrap().is_empty(), "B,C must not commit while A is incomplete");

    a.complete_flush(
        10,
        EditRecord {
            new_files: vec![file_meta(10)],
        },
    );
    installer.try_install(&memlist, &sink, &NotDropped).unwrap();

    let batches = sink.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].memtable_ids, vec![0, 1, 2]);
    assert_eq!(
        batches[0]
            .edit
            .new_files
            .iter()
            .map(|f| f.file_number)
            .collect::<Vec<_>>(),
        vec![10, 11, 12],
        "the combined edit must list all three distinct files, in creation order"
    );
}

// Scenario D: trim history retains at most the newest two 400-byte memtables
// under a 1000-byte budget.
#[test]
fn scenario_d_trim_history() {
    let list = MemTableList::new(100, 1_000);

    for id in 0..4u64 {
        let m = Memtable::new(id, 0);
        let padding = "x".repeat(380);
        m.insert(InternalKey::new("k", id, ValueType::Put), UserValue::from(padding.as_str()));
        m.seal();
        let m = std::sync::Arc::new(m);
        list.add(m.clone());
        list.remove(id);
    }

    list.trim_history(0);
    assert!(list.current().memlist_history().len() <= 2);
}

// Scenario F: a range tombstone written between two puts of the same key
// hides the older put at snapshots it outranks, without touching the newer one.
#[test]
fn scenario_f_range_tombstone_with_snapshot() {
    let list = MemTableList::new(10, 1 << 20);

    let m = Memtable::new(0, 0);
    m.insert(InternalKey::new("k", 5, ValueType::Put), UserValue::from("v1"));
    m.insert_range_tombstone(RangeTombstone::new("k".into(), "l".into(), 10));
    m.insert(InternalKey::new("k", 15, ValueType::Put), UserValue::from("v2"));
    m.seal();
    list.add(std::sync::Arc::new(m));

    match list.current().get(b"k", 7) {
        lsm_core::LookupResult::Found(v) => assert_eq!(v.as_ref(), b"v1"),
        other => panic!("expected Found(v1) at seqno 7, got {other:?}"),
    }

    assert_eq!(
        list.current().get(b"k", 12),
        lsm_core::LookupResult::Deleted,
        "range tombstone at seqno 10 must suppress v1 by snapshot 12"
    );

    match list.current().get(b"k", 20) {
        lsm_core::LookupResult::Found(v) => assert_eq!(v.as_ref(), b"v2"),
        other => panic!("expected Found(v2) at seqno 20, got {other:?}"),
    }
}
