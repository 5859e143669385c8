//! Criterion benchmarks for revdex.
//!
//! Covers the group varint codec, index construction, term lookup and the
//! external sorter.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use revdex::codec::group_varint;
use revdex::index::{IndexReader, IndexWriter, IndexWriterConfig};
use revdex::policy::{ElementCountPolicy, MemoryPolicyConfig};
use revdex::sorting::{ExternalSorter, ExternalSorterConfig, U32Codec};
use revdex::spimi::TermOccurrence;
use revdex::storage::Storage;
use revdex::storage::memory::MemoryStorage;

/// Generate a doc-ordered occurrence stream for benchmarking.
fn generate_occurrences(documents: u32) -> Vec<TermOccurrence> {
    let words = [
        "search", "engine", "index", "query", "document", "term", "posting", "segment", "merge",
        "dictionary", "block", "codec", "varint", "memory", "storage", "sort",
    ];

    let mut occurrences = Vec::new();
    for doc_id in 1..=documents {
        let mut terms: Vec<&str> = (0..8)
            .map(|j| words[(doc_id as usize * 7 + j * 13) % words.len()]) // Pseudo-random distribution
            .collect();
        terms.sort_unstable();
        terms.dedup();
        for (j, term) in terms.into_iter().enumerate() {
            occurrences.push(TermOccurrence::new(
                format!("{term}{}", doc_id % 97),
                doc_id,
                1 + j as u32 % 3,
            ));
        }
    }
    occurrences
}

/// Gaps and frequencies typical of posting lists.
fn generate_values(count: usize) -> Vec<u32> {
    (0..count)
        .map(|i| match i % 16 {
            0 => 70_000 + i as u32,
            1..=3 => 300 + i as u32 % 1000,
            _ => 1 + i as u32 % 200,
        })
        .collect()
}

/// Benchmark the group varint codec.
fn bench_group_varint(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_varint");

    let values = generate_values(100_000);
    let encoded = group_varint::encode(&values).unwrap();

    group.throughput(Throughput::Elements(values.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| black_box(group_varint::encode(black_box(&values)).unwrap()))
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(group_varint::decode(black_box(&encoded)).unwrap()))
    });

    group.finish();
}

/// Benchmark index construction and lookups.
fn bench_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("index");
    group.sample_size(20);

    let occurrences = generate_occurrences(5_000);
    group.throughput(Throughput::Elements(occurrences.len() as u64));

    for (name, max_elements) in [("build_single_segment", 1_000_000), ("build_many_segments", 2_000)] {
        let config = IndexWriterConfig {
            memory_policy: MemoryPolicyConfig::MaxElements { max_elements },
            ..IndexWriterConfig::default()
        };
        group.bench_function(name, |b| {
            b.iter_with_setup(
                || occurrences.clone(),
                |tokens| {
                    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
                    black_box(IndexWriter::new(storage, config.clone()).build(tokens).unwrap())
                },
            )
        });
    }

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
    IndexWriter::new(Arc::clone(&storage), IndexWriterConfig::default())
        .build(occurrences.clone())
        .unwrap();
    let reader = IndexReader::open(storage).unwrap();
    let terms: Vec<Vec<u8>> = occurrences.iter().take(1000).map(|o| o.term.clone()).collect();

    group.throughput(Throughput::Elements(terms.len() as u64));
    group.bench_function("lookup_term", |b| {
        b.iter(|| {
            for term in &terms {
                black_box(reader.lookup_term(black_box(term)).unwrap());
            }
        })
    });

    group.finish();
}

/// Benchmark the external sorter.
fn bench_external_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("external_sort");
    group.sample_size(20);

    let values: Vec<u32> = (0..100_000u32).map(|i| i.wrapping_mul(2_654_435_761)).collect();
    group.throughput(Throughput::Elements(values.len() as u64));

    group.bench_function("sort_10_runs", |b| {
        b.iter(|| {
            let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
            let mut sorter = ExternalSorter::new(
                storage,
                U32Codec,
                |a: &u32, b: &u32| a.cmp(b),
                ExternalSorterConfig::default(),
            )
            .with_policy(Box::new(ElementCountPolicy::new(10_000)));
            let count = sorter
                .sort_iter(values.iter().copied().map(Ok))
                .unwrap()
                .count();
            black_box(count)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_group_varint, bench_index, bench_external_sort);
criterion_main!(benches);
