//! Benchmark: campaign DAG construction and wire codecs
//!
//! Run with:
//! ```bash
//! cargo bench -p convoy-core --bench dag_codec
//! ```
//!
//! Metrics compared:
//! - Linear chain construction
//! - Whole-graph encode / decode
//! - Single-node encode / decode

use convoy_core::{Activity, Dag};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn campaign(size: usize) -> Dag {
    let activities = (0..size)
        .map(|i| {
            Activity::shell("echo")
                .arg(format!("step-{i}"))
                .env("STEP", i.to_string())
                .submit("bench-campaign")
        })
        .collect();
    Dag::linear_chain("bench-campaign", activities, None)
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("dag_build");

    for size in &[10usize, 100, 1000] {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("linear_chain", size), size, |b, &size| {
            b.iter(|| black_box(campaign(size)));
        });
    }

    group.finish();
}

fn bench_dag_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("dag_codec");

    for size in &[10usize, 100, 1000] {
        let dag = campaign(*size);
        let Ok(bytes) = dag.serialize_dag() else {
            continue;
        };
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("serialize", size), &dag, |b, dag| {
            b.iter(|| black_box(dag.serialize_dag()));
        });
        group.bench_with_input(BenchmarkId::new("deserialize", size), &bytes, |b, bytes| {
            b.iter(|| black_box(Dag::deserialize_dag(bytes)));
        });
    }

    group.finish();
}

fn bench_node_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_codec");
    let dag = campaign(100);
    let ids = dag.activity_ids();

    group.throughput(Throughput::Elements(ids.len() as u64));
    group.bench_function("serialize_all", |b| {
        b.iter(|| {
            for id in &ids {
                black_box(dag.serialize_node(id).ok());
            }
        });
    });

    let encoded: Vec<Vec<u8>> = ids.iter().filter_map(|id| dag.serialize_node(id).ok()).collect();
    group.bench_function("deserialize_all", |b| {
        b.iter(|| {
            for bytes in &encoded {
                black_box(Dag::deserialize_node(bytes).ok());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_build, bench_dag_codec, bench_node_codec);
criterion_main!(benches);
