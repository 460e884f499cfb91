//! Overlap and partition benchmarks using Criterion.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

use trackset_rs::config::{OverlapConfig, SplitConfig};
use trackset_rs::overlap::{boxes_to_matrix, iof_matrix, max_iof};
use trackset_rs::{BBox, OverlapResolver, PartitionPlan};

/// A crowded frame: `n` boxes on a grid, neighbours overlapping by a quarter.
fn create_test_boxes(n: usize) -> Vec<BBox> {
    (0..n)
        .map(|i| {
            let x = ((i % 10) * 30) as i64;
            let y = ((i / 10) * 60) as i64;
            BBox::from_corners((x, y), (x + 40, y + 80))
        })
        .collect()
}

fn benchmark_iof_matrix(c: &mut Criterion) {
    let mut group = c.benchmark_group("iof_matrix");
    for n in [10, 25, 100] {
        let matrix = boxes_to_matrix(&create_test_boxes(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &matrix, |b, m| {
            b.iter(|| iof_matrix(black_box(m), black_box(m)))
        });
    }
    group.finish();
}

fn benchmark_max_iof(c: &mut Criterion) {
    let boxes = create_test_boxes(25);
    c.bench_function("max_iof_25_boxes", |b| b.iter(|| max_iof(black_box(&boxes))));
}

fn benchmark_overlap_resolver(c: &mut Criterion) {
    let resolver = OverlapResolver::new(&OverlapConfig::default());
    let boxes = create_test_boxes(25);
    c.bench_function("overlap_resolve_25_boxes", |b| {
        b.iter(|| resolver.resolve(black_box(&boxes)))
    });
}

fn benchmark_partition_plan(c: &mut Criterion) {
    let crops: BTreeMap<u32, Vec<String>> = (0..200u32)
        .map(|gid| {
            let names = (0..150)
                .map(|i| format!("{:04}_c1s1_{:06}_00.jpg", gid, gid as usize * 150 + i))
                .collect();
            (gid, names)
        })
        .collect();
    let config = SplitConfig::default();

    c.bench_function("partition_plan_200_identities", |b| {
        b.iter(|| PartitionPlan::build(black_box(&crops), black_box(&config)))
    });
}

criterion_group!(
    benches,
    benchmark_iof_matrix,
    benchmark_max_iof,
    benchmark_overlap_resolver,
    benchmark_partition_plan,
);
criterion_main!(benches);
