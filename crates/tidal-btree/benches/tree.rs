use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use rand::Rng;
use tidal_btree::{Reducer, Tree};

const ENTRIES: u64 = 10_000;

fn populated(split: usize) -> Tree<u64, u64> {
    (0..ENTRIES).fold(Tree::with_page_split_size(split), |tree, k| tree.set(k, k))
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");
    for split in [8usize, 32, 128] {
        let tree = populated(split);
        group.bench_function(format!("split_{split}"), |b| {
            let mut rng = rand::rng();
            b.iter(|| {
                let key = rng.random_range(0..ENTRIES * 2);
                black_box(tree.set(key, key + 1))
            })
        });
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let tree = populated(32);
    let mut rng = rand::rng();
    c.bench_function("get", |b| {
        b.iter(|| {
            let key = rng.random_range(0..ENTRIES);
            black_box(tree.get(&key).copied())
        })
    });
}

fn bench_delete(c: &mut Criterion) {
    let tree = populated(32);
    let mut rng = rand::rng();
    c.bench_function("delete", |b| {
        b.iter_batched(
            || rng.random_range(0..ENTRIES),
            |key| black_box(tree.delete(&key)),
            BatchSize::SmallInput,
        )
    });
}

fn bench_reduced(c: &mut Criterion) {
    let tree = populated(32);
    let sum = Reducer::new(0, |acc: u64, v: &u64| acc + v, |a: u64, b: u64| a + b);
    // Warm every page cache so the steady-state cost is measured.
    tree.reduced(&sum);

    c.bench_function("reduced_cached", |b| {
        b.iter(|| black_box(tree.reduced(&sum)))
    });

    let mut rng = rand::rng();
    c.bench_function("reduced_after_set", |b| {
        b.iter_batched(
            || {
                let key = rng.random_range(0..ENTRIES);
                tree.set(key, 0)
            },
            |next| black_box(next.reduced(&sum)),
            BatchSize::SmallInput,
        )
    });
}

fn bench_iterate(c: &mut Criterion) {
    let tree = populated(32);
    c.bench_function("entries", |b| b.iter(|| black_box(tree.entries().count())));
}

criterion_group!(benches, bench_set, bench_get, bench_delete, bench_reduced, bench_iterate);
criterion_main!(benches);
