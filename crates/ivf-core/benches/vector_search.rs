//! Query throughput across corpus sizes and partition counts, grounded on
//! the original implementation's benchmark table: 768-dim vectors at 10k
//! and 100k records, each with and without partitioning.

use std::collections::HashMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ivf_core::{Index, MetricRegistry, Record};
use rand::Rng;
use rand_distr::StandardNormal;
use uuid::Uuid;

const DIMENSION: usize = 768;

fn random_vector(rng: &mut impl Rng, dim: usize) -> Vec<f64> {
    (0..dim).map(|_| rng.sample(StandardNormal)).collect()
}

fn build_index(db_size: usize, num_cells: usize) -> Index {
    let index = Index::new(DIMENSION, num_cells, MetricRegistry::with_defaults()).unwrap();
    let mut rng = rand::thread_rng();
    for _ in 0..db_size {
        let data = random_vector(&mut rng, DIMENSION);
        index
            .insert(Record::new(Uuid::new_v4().to_string(), data, HashMap::new()))
            .unwrap();
    }
    if num_cells > 1 {
        index.reindex("l2", None).unwrap();
    }
    index
}

fn bench_query(c: &mut Criterion) {
    let scenarios = [
        ("10k_with_partitions", 10_000usize, (10_000f64).sqrt() as usize),
        ("10k_no_partition", 10_000, 1),
        ("100k_with_partitions", 100_000, (100_000f64).sqrt() as usize),
        ("100k_no_partition", 100_000, 1),
    ];

    let mut group = c.benchmark_group("query");
    group.sample_size(10);

    for (name, db_size, num_cells) in scenarios {
        let index = build_index(db_size, num_cells.max(1));
        let mut rng = rand::thread_rng();
        group.bench_with_input(BenchmarkId::from_parameter(name), &index, |b, index| {
            b.iter(|| {
                let probe = random_vector(&mut rng, DIMENSION);
                let probes = (num_cells.max(1) / 10).max(1);
                index.query(&probe, 1, probes, "l2", None).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_query);
criterion_main!(benches);
