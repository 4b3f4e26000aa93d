//! eduaudit benchmark suite.
//!
//! Benchmarks for key operations:
//! - Submit throughput through the worker to a sink
//! - JSON Lines encoding of batches
//! - Dead-letter appends

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Runtime;


use bench_utils::CountingSink;
use eduaudit::config::WorkerConfig;
use eduaudit::dlq::{DeadLetterStore, REASON_MAX_RETRIES};
use eduaudit::worker::AuditWorker;

/// End-to-end: submit N entries, stop, and wait for the drain.
fn submit_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("submit");

    for size in [1_000, 10_000] {
        let entries = bench_utils::generate_entries(size);
        group.throughput(Throughput::Elements(size as u64));

        for batch_size in [10, 100, 1000] {
            group.bench_with_input(
                BenchmarkId::new(format!("batch_{batch_size}"), size),
                &entries,
                |b, entries| {
                    b.to_async(&rt).iter(|| {
                        let entries = entries.clone();
                        let store_path = dir.path().join("dead_letter.jsonl");
                        async move {
                            let sink = Arc::new(CountingSink::default());
                            let store = Arc::new(DeadLetterStore::new(store_path, 1024 * 1024, 1));
                            let config = WorkerConfig {
                                batch_size,
                                channel_capacity: size,
                                ..WorkerConfig::default()
                            };
                            let worker = AuditWorker::new(config, sink.clone(), store);
                            worker.start();
                            for entry in entries {
                                worker.submit(entry);
                            }
                            worker.stop().await;
                            assert_eq!(sink.entries(), size as u64);
                        }
                    });
                },
            );
        }
    }

    group.finish();
}

/// Serializing batches the way the file sink writes them.
fn encoding_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_ndjson");

    for size in [100, 1000] {
        let entries = bench_utils::generate_entries(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &entries, |b, entries| {
            b.iter(|| {
                let mut out = String::new();
                for entry in entries {
                    out.push_str(&serde_json::to_string(entry).unwrap());
                    out.push('\n');
                }
                out
            });
        });
    }

    group.finish();
}

/// Appending a failed batch, including rotation once files fill up.
fn dead_letter_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = DeadLetterStore::new(dir.path().join("dead_letter.jsonl"), 256 * 1024, 3);
    let entries = bench_utils::generate_entries(100);
    let (store, entries) = (&store, &entries);

    let mut group = c.benchmark_group("dead_letter");
    group.throughput(Throughput::Elements(entries.len() as u64));
    group.bench_function("add_failed_batch_100", |b| {
        b.to_async(&rt).iter(move || async move {
            store
                .add_failed_batch(entries.clone(), REASON_MAX_RETRIES, "connection refused")
                .await
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    submit_benchmarks,
    encoding_benchmarks,
    dead_letter_benchmarks,
);
criterion_main!(benches);
