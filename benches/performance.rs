//! Performance benchmarks for the collection store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reactive_store::{Collection, Document};
use serde_json::json;

fn seeded(count: usize) -> Collection<Document> {
    let collection = Collection::new("bench");
    for i in 0..count {
        collection
            .create(json!({"id": format!("id-{}", i), "label": "item", "done": false}))
            .unwrap();
    }
    collection
}

/// Benchmark record creation into collections of varying size
fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("create");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("existing", size), &size, |b, &size| {
            let collection = seeded(size);
            let mut next = size;
            b.iter(|| {
                next += 1;
                black_box(
                    collection
                        .create(json!({"id": format!("id-{}", next), "done": false}))
                        .unwrap(),
                );
            });
        });
    }

    group.finish();
}

/// Benchmark patching with and without a combined stream attached
fn bench_patch(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("plain", size), &size, |b, &size| {
            let collection = seeded(size);
            let mut flag = false;
            b.iter(|| {
                flag = !flag;
                black_box(collection.patch("id-0", json!({"done": flag})).unwrap());
            });
        });

        group.bench_with_input(BenchmarkId::new("combined", size), &size, |b, &size| {
            let collection = seeded(size);
            let all = collection.get_all_stream();
            let mut flag = false;
            b.iter(|| {
                flag = !flag;
                black_box(collection.patch("id-0", json!({"done": flag})).unwrap());
            });
            drop(all);
        });
    }

    group.finish();
}

/// Benchmark whole-collection reads
fn bench_get_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_all");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("records", size), &size, |b, &size| {
            let collection = seeded(size);
            b.iter(|| {
                black_box(collection.get_all());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_create, bench_patch, bench_get_all);
criterion_main!(benches);
