//! Micro-benchmarks for the per-sample cache hot path.
//!
//! Covers bucket insertion under eviction pressure and affinity scoring for
//! stores sized like the usual benchmark suites (ImageNet: 1000 classes).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tda_cache::cache::scorer::{affinity_logits, CacheMatrices};
use tda_cache::config::ThresholdWindow;
use tda_cache::{CacheEntry, CacheKind, CacheStore, ClassBucket, Embedding};

const DIM: usize = 512;

/// Deterministic pseudo-random vector (LCG) so runs are comparable
fn vector(seed: u64, dim: usize) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..dim)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
        })
        .collect()
}

fn filled_store(kind: CacheKind, num_classes: usize, capacity: usize) -> CacheStore {
    let mut store = CacheStore::new(kind, capacity).unwrap();
    for class in 0..num_classes {
        for shot in 0..capacity {
            let seed = (class * capacity + shot) as u64;
            let embedding = Embedding::new(vector(seed, DIM));
            let loss = 0.1 + shot as f32 * 0.05;
            let entry = match kind {
                CacheKind::Positive => CacheEntry::positive(embedding, loss),
                CacheKind::Negative => {
                    let mut map = vec![0.5 / num_classes as f32; num_classes];
                    map[class] += 0.5;
                    CacheEntry::negative(embedding, loss, map)
                }
            };
            store.update(class, entry).unwrap();
        }
    }
    store
}

fn bench_bucket_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_insert");

    for capacity in [2, 3, 6, 16] {
        let embedding = Embedding::new(vector(7, DIM));
        let losses: Vec<f32> = (0..256).map(|i| ((i * 37) % 101) as f32 / 100.0).collect();

        group.bench_with_input(
            BenchmarkId::new("stream_256", capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let mut bucket = ClassBucket::new();
                    for &loss in &losses {
                        bucket.insert(
                            CacheEntry::positive(embedding.clone(), loss),
                            black_box(capacity),
                        );
                    }
                    bucket
                });
            },
        );
    }

    group.finish();
}

fn bench_affinity_logits(c: &mut Criterion) {
    let mut group = c.benchmark_group("affinity_logits");
    let query = Embedding::new(vector(424242, DIM));

    for num_classes in [10, 100, 1000] {
        let positive = filled_store(CacheKind::Positive, num_classes, 3);
        group.bench_with_input(
            BenchmarkId::new("positive", num_classes),
            &positive,
            |b, store| {
                b.iter(|| {
                    affinity_logits(black_box(&query), store, 2.0, 5.0, num_classes, None).unwrap()
                });
            },
        );

        let negative = filled_store(CacheKind::Negative, num_classes, 2);
        let mask = Some(ThresholdWindow::new(0.03, 1.0));
        group.bench_with_input(
            BenchmarkId::new("negative", num_classes),
            &negative,
            |b, store| {
                b.iter(|| {
                    affinity_logits(black_box(&query), store, 0.117, 1.0, num_classes, mask)
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

fn bench_matrix_form(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_matrices");
    let query = Embedding::new(vector(99, DIM));

    for num_classes in [10, 100] {
        let store = filled_store(CacheKind::Positive, num_classes, 3);
        let matrices = CacheMatrices::build(&store, num_classes, None).unwrap();

        group.bench_with_input(
            BenchmarkId::new("build", num_classes),
            &store,
            |b, store| {
                b.iter(|| CacheMatrices::build(black_box(store), num_classes, None).unwrap());
            },
        );

        group.bench_with_input(
            BenchmarkId::new("score", num_classes),
            &matrices,
            |b, matrices| {
                b.iter(|| matrices.score(black_box(&query), 2.0, 5.0).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(
    name = cache_benches;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(std::time::Duration::from_secs(3));
    targets = bench_bucket_insert, bench_affinity_logits, bench_matrix_form
);

criterion_main!(cache_benches);
