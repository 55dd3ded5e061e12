//! Pipeline benchmarks.
//!
//! Run with:
//! ```
//! cargo bench --bench pipeline_bench
//! ```

#[path = "../src/test_support.rs"]
mod test_support;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use readmart::aggregate::{decode_facts, rebuild_summaries};
use readmart::config::{RankWeights, RepresentativeRule, TieBreak};
use readmart::model::Granularity;
use readmart::rank::rebuild_ranking;
use readmart::{DocumentStore, MemoryStore, Readmart, ReadmartConfig};
use std::hint::black_box;
use std::time::Duration;
use test_support::{generate_dataset, load_dataset};

// =============================================================================
// PURE STAGES
// =============================================================================

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    for reads in [10_000u32, 100_000] {
        let store = MemoryStore::new();
        load_dataset(&store, &generate_dataset(2_000, 500, reads, 42)).expect("load dataset");
        let stored = store.find_all("reads").expect("stored reads");
        let (facts, malformed) = decode_facts(&stored);
        assert_eq!(facts.len(), reads as usize);
        assert_eq!(malformed, 0);
        let summaries = rebuild_summaries(&facts, RepresentativeRule::default()).summaries;
        assert!(!summaries.is_empty());

        group.throughput(Throughput::Elements(reads as u64));
        group.bench_with_input(BenchmarkId::new("summaries", reads), &facts, |b, facts| {
            b.iter(|| black_box(rebuild_summaries(facts, RepresentativeRule::default())))
        });
        group.bench_with_input(BenchmarkId::new("ranking", reads), &summaries, |b, summaries| {
            b.iter(|| {
                black_box(rebuild_ranking(
                    summaries,
                    &Granularity::ALL,
                    &RankWeights::default(),
                    TieBreak::default(),
                ))
            })
        });
    }
    group.finish();
}

// =============================================================================
// FULL PIPELINE
// =============================================================================

fn bench_pipeline_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    let reads = 20_000u32;
    let dataset = generate_dataset(1_000, 300, reads, 7);
    group.throughput(Throughput::Elements(reads as u64));
    group.bench_function(BenchmarkId::new("memory", reads), |b| {
        b.iter_batched(
            || {
                let store = MemoryStore::new();
                load_dataset(&store, &dataset).expect("load dataset");
                Readmart::new(store, ReadmartConfig::default())
            },
            |readmart| black_box(readmart.run_pipeline().expect("pipeline")),
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_rebuild, bench_pipeline_memory);
criterion_main!(benches);
