use criterion::{criterion_group, criterion_main, Criterion};
use lsm_core::range_tombstone::Fragmenter;
use lsm_core::{RangeTombstone, UserKey};

fn fragmenter(c: &mut Criterion) {
    for num_tombstones in [10, 100, 1_000, 10_000] {
        c.bench_function(&format!("Fragment {num_tombstones} tombstones"), |b| {
            let tombstones: Vec<RangeTombstone> = (0..num_tombstones)
                .map(|i| {
                    let start: UserKey = format!("key-{i:08}").into();
                    let end: UserKey = format!("key-{:08}", i + 2).into();
                    RangeTombstone::new(start, end, i as u64)
                })
                .collect();

            b.iter_with_large_drop(|| Fragmenter::fragment(tombstones.clone()));
        });
    }
}

fn seek(c: &mut Criterion) {
    let tombstones: Vec<RangeTombstone> = (0..10_000)
        .map(|i| {
            let start: UserKey = format!("key-{i:08}").into();
            let end: UserKey = format!("key-{:08}", i + 2).into();
            RangeTombstone::new(start, end, i as u64)
        })
        .collect();
    let fragmented = Fragmenter::fragment(tombstones);

    c.bench_function("Seek fragmented list", |b| {
        b.iter(|| fragmented.seek(b"key-00005000"));
    });
}

criterion_group!(benches, fragmenter, seek);
criterion_main!(benches);
