use std::sync::Arc;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use tokio::runtime::Runtime;
use tokio::sync::Barrier;

use velocity_limit::BucketStore;
use velocity_limit::CountingObserver;
use velocity_limit::LimiterConfig;
use velocity_limit::MemoryStore;
use velocity_limit::RateLimiter;
use velocity_limit::ShardRouter;

fn bench_router(c: &mut Criterion) {
    let mut group = c.benchmark_group("ShardRouter");

    for shards in [1usize, 4, 16] {
        let router = ShardRouter::new((0..shards).collect::<Vec<_>>()).unwrap();
        group.bench_with_input(BenchmarkId::new("select", shards), &router, |b, r| {
            b.iter(|| black_box(r.select(black_box("203.0.113.42"))))
        });
    }

    group.finish();
}

fn make_limiter<S: BucketStore>(shards: Vec<S>) -> Arc<RateLimiter<S>> {
    // Effectively unlimited so the benchmark measures the allow path.
    let config = LimiterConfig::new(1e12, 1e12).unwrap();
    Arc::new(
        RateLimiter::new(shards, config)
            .unwrap()
            .with_observer(Arc::new(CountingObserver::new())),
    )
}

fn bench_single_identity<S: BucketStore + 'static>(
    group_name: &str,
    c: &mut Criterion,
    rt: &Runtime,
    limiter: Arc<RateLimiter<S>>,
) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-identity", |b| {
        b.to_async(rt).iter(|| {
            let l = Arc::clone(&limiter);
            async move { black_box(l.decide("bench-user").await) }
        })
    });

    group.finish();
}

fn bench_parallel_identities<S: BucketStore + 'static>(
    group_name: &str,
    c: &mut Criterion,
    rt: &Runtime,
    limiter: Arc<RateLimiter<S>>,
) {
    let mut group = c.benchmark_group(group_name);

    for tasks in [2, 4, 8].iter() {
        let num_tasks = *tasks;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-tasks", num_tasks)),
            &num_tasks,
            |b, &n| {
                b.iter_custom(|iters| {
                    rt.block_on(async {
                        let barrier = Arc::new(Barrier::new(n + 1));
                        let mut handles = Vec::with_capacity(n);

                        for t in 0..n {
                            let l = Arc::clone(&limiter);
                            let bar = Arc::clone(&barrier);
                            let iters_per_task = iters / n as u64;
                            let identity = format!("bench-user-{t}");

                            handles.push(tokio::spawn(async move {
                                bar.wait().await;
                                for _ in 0..iters_per_task {
                                    black_box(l.decide(&identity).await);
                                }
                            }));
                        }

                        barrier.wait().await;
                        let start = Instant::now();

                        for handle in handles {
                            let _ = handle.await;
                        }

                        start.elapsed()
                    })
                });
            },
        );
    }
    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    bench_router(c);

    let single = make_limiter(vec![MemoryStore::new()]);
    bench_single_identity("Memory-Static", c, &rt, Arc::clone(&single));
    bench_parallel_identities("Memory-Static", c, &rt, single);

    let sharded = make_limiter((0..4).map(|_| MemoryStore::new()).collect());
    bench_parallel_identities("Memory-4-Shards", c, &rt, sharded);

    // The cost of going through a trait object
    let dynamic: Vec<Arc<dyn BucketStore>> = vec![Arc::new(MemoryStore::new())];
    bench_single_identity("Memory-Dynamic", c, &rt, make_limiter(dynamic));
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
