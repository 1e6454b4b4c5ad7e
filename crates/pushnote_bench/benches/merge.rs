//! Merge engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pushnote_bench::{as_list, locals_for, random_catalog};
use pushnote_sync::{merge_representables_and_local, merge_to_representables};

/// Benchmark merging a remote page with local services.
fn bench_merge_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_to_representables");

    for size in [25, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let catalog = random_catalog(size);
            let locals = locals_for(&catalog, 4);
            b.iter(|| {
                let output = merge_to_representables(black_box(&catalog), black_box(&locals));
                black_box(output);
            });
        });
    }
    group.finish();
}

/// Benchmark the offline union of the list with every local service.
fn bench_merge_offline(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_representables_and_local");

    for size in [100, 1000, 5000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let catalog = random_catalog(size);
            // Half the catalog is listed, a third is stored locally.
            let list = as_list(&catalog[..size / 2]);
            let locals = locals_for(&catalog, 3);
            b.iter(|| {
                let merged = merge_representables_and_local(black_box(&list), black_box(&locals));
                black_box(merged);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_merge_page, bench_merge_offline);
criterion_main!(benches);
