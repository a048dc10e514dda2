//! End-to-end invocation benchmarks.
//!
//! Full caller path over the in-process transport: interceptors,
//! resolution, pooled connection, correlation, dispatch and typed
//! argument coercion on the serving side.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde::Deserialize;
use serde_json::json;
use stratus::{
    ClusterInvoker, Context, Endpoint, InvokeStrategy, LocalConnector, Params, ServiceDescriptor,
    ServiceDispatcher, ServiceRegistry, StaticRouteProvider, StratusError,
};
use tokio::runtime::Runtime;

#[derive(Deserialize)]
struct Add {
    a: i64,
    b: i64,
}

fn cluster(nodes: u16) -> ClusterInvoker<StaticRouteProvider> {
    let registry = ServiceRegistry::builder()
        .register("math.add", |args: Add| async move { Ok::<_, StratusError>(args.a + args.b) })
        .build();
    let dispatcher = Arc::new(ServiceDispatcher::new(registry));

    let connector = LocalConnector::new();
    let endpoints: Vec<_> = (0..nodes).map(|port| Endpoint::new("node", port)).collect();
    for endpoint in &endpoints {
        connector.register(endpoint.clone(), dispatcher.clone());
    }

    let routes = StaticRouteProvider::new();
    routes.set_route(ServiceDescriptor::new("math.add"), endpoints);
    ClusterInvoker::builder(routes, Arc::new(connector)).build()
}

fn args() -> Params {
    let mut params = Params::new();
    params.insert("a".into(), json!(20));
    params.insert("b".into(), json!(22));
    params
}

fn bench_invoke(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("invoke_local");
    let descriptor = ServiceDescriptor::new("math.add");

    for nodes in [1u16, 4] {
        let invoker = cluster(nodes);
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("nodes", nodes), &nodes, |b, _| {
            b.to_async(&rt).iter(|| async {
                let value = invoker
                    .invoke(Context::new(), &descriptor, args(), None, InvokeStrategy::FailoverHandover)
                    .await
                    .unwrap();
                black_box(value);
            });
        });
    }

    group.finish();
}

fn bench_invoke_concurrent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("invoke_local_concurrent");
    let invoker = Arc::new(cluster(4));
    let descriptor = ServiceDescriptor::new("math.add");

    for calls in [16usize, 128] {
        group.throughput(Throughput::Elements(calls as u64));

        group.bench_with_input(BenchmarkId::from_parameter(calls), &calls, |b, &calls| {
            b.to_async(&rt).iter(|| {
                let invoker = invoker.clone();
                let descriptor = descriptor.clone();
                async move {
                    let tasks: Vec<_> = (0..calls)
                        .map(|_| {
                            let invoker = invoker.clone();
                            let descriptor = descriptor.clone();
                            tokio::spawn(async move {
                                invoker
                                    .invoke(Context::new(), &descriptor, args(), None, InvokeStrategy::SingleAttempt)
                                    .await
                                    .unwrap()
                            })
                        })
                        .collect();
                    for task in tasks {
                        black_box(task.await.unwrap());
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_invoke, bench_invoke_concurrent);
criterion_main!(benches);
