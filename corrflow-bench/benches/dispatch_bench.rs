//! End-to-end dispatch benchmarks against the in-memory store.

use corrflow_bench::{Heartbeat, Pipeline, Retry, Start};
use corrflow_core::{BlueprintRegistry, CancellationToken, DispatchOptions, WorkflowDispatcher};
use corrflow_storage::MemoryStore;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn bench_start(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let dispatcher = WorkflowDispatcher::<Pipeline, Start>::new(Arc::new(BlueprintRegistry::new()));
    let cancel = CancellationToken::new();

    let mut group = c.benchmark_group("dispatch_start");
    group.throughput(Throughput::Elements(1));

    let mut id = 0u64;
    group.bench_function("new_instance", |b| {
        b.to_async(&rt).iter(|| {
            id += 1;
            let session = store.begin();
            let message = Start {
                id: format!("job-{}", id),
            };
            let dispatcher = &dispatcher;
            let cancel = &cancel;
            async move {
                black_box(
                    dispatcher
                        .dispatch(message, &session.services(), cancel)
                        .await
                        .unwrap(),
                )
            }
        });
    });

    group.finish();
}

fn bench_transfer(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(BlueprintRegistry::new());
    let cancel = CancellationToken::new();

    rt.block_on(async {
        WorkflowDispatcher::<Pipeline, Start>::new(registry.clone())
            .dispatch(
                Start {
                    id: "job-1".to_string(),
                },
                &store.begin().services(),
                &cancel,
            )
            .await
            .unwrap();
    });

    let mut group = c.benchmark_group("dispatch_transfer");
    group.throughput(Throughput::Elements(1));

    let heartbeat = WorkflowDispatcher::<Pipeline, Heartbeat>::new(registry.clone());
    group.bench_function("actions_only", |b| {
        b.to_async(&rt).iter(|| {
            let session = store.begin();
            let heartbeat = &heartbeat;
            let cancel = &cancel;
            async move {
                let message = Heartbeat {
                    id: "job-1".to_string(),
                };
                black_box(
                    heartbeat
                        .dispatch(message, &session.services(), cancel)
                        .await
                        .unwrap(),
                )
            }
        });
    });

    // Retry has no rule in Processing
    for persist_unchanged_state in [true, false] {
        let retry = WorkflowDispatcher::<Pipeline, Retry>::new(registry.clone())
            .with_options(DispatchOptions {
                persist_unchanged_state,
            });

        group.bench_with_input(
            BenchmarkId::new("unmatched", persist_unchanged_state),
            &persist_unchanged_state,
            |b, _| {
                b.to_async(&rt).iter(|| {
                    let session = store.begin();
                    let retry = &retry;
                    let cancel = &cancel;
                    async move {
                        let message = Retry {
                            id: "job-1".to_string(),
                        };
                        black_box(
                            retry
                                .dispatch(message, &session.services(), cancel)
                                .await
                                .unwrap(),
                        )
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_start, bench_transfer);

criterion_main!(benches);
