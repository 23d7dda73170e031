//! Ranking store benchmarks
//!
//! Benchmarks the two hot store operations on both backends:
//! - `merge_or_keep` (compare-and-swap with counter increment)
//! - `top_k` over a populated store
//! - Balancer selection on top of `top_k`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use subset_ensemble::balancer::select_next;
use subset_ensemble::hyperparams::HyperParameters;
use subset_ensemble::model::ModelArtifact;
use subset_ensemble::store::{
    FeatureSetKey, MemoryRankingStore, RankingStore, SqliteRankingStore,
};

fn key(i: usize) -> FeatureSetKey {
    FeatureSetKey::from_features([format!("f{}", i % 97), format!("g{}", i / 97)]).unwrap()
}

#[allow(clippy::cast_precision_loss)]
fn score(i: usize) -> f64 {
    ((i as f64) * 0.618_033_988_7).fract()
}

fn populate<S: RankingStore>(store: &S, n: usize) {
    let params = HyperParameters::builder().build().unwrap();
    let artifact = ModelArtifact::from_bytes(vec![0; 4096]);
    for i in 0..n {
        store.merge_or_keep(&key(i), score(i), &params, &artifact).unwrap();
    }
}

fn sqlite() -> SqliteRankingStore {
    let store = SqliteRankingStore::open_in_memory().unwrap();
    store.ensure_schema().unwrap();
    store
}

fn bench_merge_or_keep(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_or_keep");
    let params = HyperParameters::builder().build().unwrap();
    let artifact = ModelArtifact::from_bytes(vec![0; 4096]);

    let memory = MemoryRankingStore::new();
    populate(&memory, 1_000);
    let mut i = 0;
    group.bench_function("memory", |b| {
        b.iter(|| {
            i += 1;
            memory
                .merge_or_keep(black_box(&key(i % 1_000)), score(i), &params, &artifact)
                .unwrap()
        });
    });

    let store = sqlite();
    populate(&store, 1_000);
    let mut i = 0;
    group.bench_function("sqlite", |b| {
        b.iter(|| {
            i += 1;
            store
                .merge_or_keep(black_box(&key(i % 1_000)), score(i), &params, &artifact)
                .unwrap()
        });
    });

    group.finish();
}

fn bench_top_k(c: &mut Criterion) {
    let mut group = c.benchmark_group("top_k");

    for size in [1_000, 10_000] {
        let memory = MemoryRankingStore::new();
        populate(&memory, size);
        group.bench_with_input(BenchmarkId::new("memory", size), &size, |b, _| {
            b.iter(|| memory.top_k(black_box(100)).unwrap());
        });

        let store = sqlite();
        populate(&store, size);
        group.bench_with_input(BenchmarkId::new("sqlite", size), &size, |b, _| {
            b.iter(|| store.top_k(black_box(100)).unwrap());
        });
    }

    group.finish();
}

fn bench_select_next(c: &mut Criterion) {
    let store = MemoryRankingStore::new();
    populate(&store, 10_000);
    c.bench_function("select_next_memory_10k", |b| {
        b.iter(|| select_next(&store, black_box(10), black_box(100), 0.5).unwrap());
    });
}

criterion_group!(benches, bench_merge_or_keep, bench_top_k, bench_select_next);
criterion_main!(benches);
