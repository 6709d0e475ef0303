use criterion::{criterion_group, criterion_main, Criterion};
use lsm_core::merge::VecIterator;
use lsm_core::{InternalIterator, InternalKey, Level, MergingIterator, UserValue, ValueType};

fn merger(c: &mut Criterion) {
    for num_levels in [2, 4, 8, 16, 30] {
        c.bench_function(&format!("Merge {num_levels} levels"), |b| {
            let levels: Vec<Vec<(InternalKey, UserValue)>> = (0..num_levels)
                .map(|level| {
                    (0..100)
                        .map(|i| {
                            let key = format!("key-{i:08}");
                            (
                                InternalKey::new(key, (level * 100 + i) as u64, ValueType::Put),
                                UserValue::from("v"),
                            )
                        })
                        .collect()
                })
                .collect();

            b.iter_with_large_drop(|| {
                let children = levels
                    .iter()
                    .map(|items| {
                        let child: Box<dyn InternalIterator + Send> =
                            Box::new(VecIterator::new(items.clone()));
                        Level::new(child)
                    })
                    .collect();

                let mut iter = MergingIterator::new(children, u64::MAX);
                iter.seek_to_first();

                let mut count = 0;
                while iter.valid() {
                    count += 1;
                    iter.next();
                }
                assert_eq!(count, num_levels * 100);
            });
        });
    }
}

criterion_group!(benches, merger);
criterion_main!(benches);
