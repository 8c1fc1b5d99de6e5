use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use hdrhistogram::Histogram;
use http::Request;
use http::Response;
use rand::Rng;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower::service_fn;
use tracing_subscriber::EnvFilter;

use tower_velocity::RateLimitLayer;
use tower_velocity::VelocityError;
use velocity_limit::BucketStore;
use velocity_limit::CountingObserver;
use velocity_limit::LimiterConfig;
use velocity_limit::MemoryStore;
use velocity_limit::RateLimiter;
use velocity_limit::RedisStore;
use velocity_limit::StoreAddresses;

#[derive(Parser, Debug)]
#[command(name = "stress_test")]
#[command(about = "Fire concurrent requests through the rate limit middleware")]
struct Args {
    /// Total requests to send
    #[arg(long, default_value_t = 10_000)]
    requests: usize,

    /// Distinct client addresses the requests are spread over
    #[arg(long, default_value_t = 100)]
    identities: u32,

    /// Tokens added per second
    #[arg(long, default_value_t = 5.0)]
    rate: f64,

    /// Bucket capacity
    #[arg(long, default_value_t = 10.0)]
    capacity: f64,

    /// Simulated work inside the protected service
    #[arg(long, default_value = "1ms", value_parser = humantime::parse_duration)]
    work: Duration,

    /// Comma separated redis shards; the in-memory store is used when absent
    #[arg(long, env = "REDIS_ADDRS")]
    redis: Option<String>,
}

#[derive(Default)]
struct RejectionCounter {
    limited: usize,
    inner: usize,
    unknown: usize,
}

async fn run_load_test<St>(name: &str, limiter: Arc<RateLimiter<St>>, args: &Args)
where
    St: BucketStore + 'static,
{
    let work = args.work;
    let backend = service_fn(move |_req: Request<()>| async move {
        sleep(work).await;
        Ok::<_, BoxError>(Response::new("success"))
    });
    let svc = RateLimitLayer::new(limiter).layer(backend);

    let mut hist_elapsed = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
    let mut tasks = JoinSet::new();
    let mut rejections = RejectionCounter::default();

    let barrier = Arc::new(Barrier::new(args.requests));
    let mut rng = rand::rng();

    let start = Instant::now();

    for _ in 0..args.requests {
        let mut local_svc = svc.clone();
        let bar = barrier.clone();
        let client = rng.random_range(0..args.identities.max(1));
        tasks.spawn(async move {
            let mut req = Request::new(());
            req.extensions_mut().insert(SocketAddr::from((
                Ipv4Addr::from(0x0a00_0000 + client),
                40_000,
            )));

            bar.wait().await;
            let req_start = Instant::now();
            let res = match local_svc.ready().await {
                Ok(ready_svc) => ready_svc.call(req).await.map(|_| ()),
                Err(e) => Err(e),
            };
            (res, req_start.elapsed())
        });
    }

    let mut success_count = 0;

    while let Some(task) = tasks.join_next().await {
        let (res, elapsed) = task.expect("Task panicked");
        match res {
            Ok(()) => {
                success_count += 1;
                hist_elapsed.record(elapsed.as_micros() as u64).unwrap();
            }
            Err(e) => match e.downcast_ref::<VelocityError>() {
                Some(VelocityError::RateLimited { .. }) => rejections.limited += 1,
                Some(VelocityError::Inner(_)) => rejections.inner += 1,
                None => rejections.unknown += 1,
            },
        }
    }

    let total_duration = start.elapsed();
    let throughput = args.requests as f64 / total_duration.as_secs_f64();

    println!("--- {} ---", name);
    println!("Total Duration:  {:.2?}", total_duration);
    println!("Success/Total:   {}/{}", success_count, args.requests);
    println!("Total Rate:      {:.2} req/sec", throughput);

    if success_count > 0 {
        println!("P50 (Elapsed):   {}µs", hist_elapsed.value_at_quantile(0.5));
        println!(
            "P99 (Elapsed):   {}µs",
            hist_elapsed.value_at_quantile(0.99)
        );
    }

    let total_errors = rejections.limited + rejections.inner + rejections.unknown;
    println!("Errors:          {}", total_errors);
    if total_errors > 0 {
        println!("  └─ Limited:    {}", rejections.limited);
        if rejections.inner > 0 {
            println!("  └─ Inner:      {}", rejections.inner);
        }
        if rejections.unknown > 0 {
            println!("  └─ Unknown:    {}", rejections.unknown);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = LimiterConfig::new(args.rate, args.capacity)?;
    let counts = Arc::new(CountingObserver::new());

    match args.redis.as_deref() {
        Some(list) => {
            let addresses = StoreAddresses::parse(list);
            let shards = RedisStore::connect_all(&addresses).await?;
            let name = format!("Redis ({} shards)", shards.len());
            let limiter = RateLimiter::new(shards, config)?.with_observer(counts.clone());
            run_load_test(&name, Arc::new(limiter), &args).await;
        }
        None => {
            let limiter =
                RateLimiter::new(vec![MemoryStore::new()], config)?.with_observer(counts.clone());
            run_load_test("In-Memory", Arc::new(limiter), &args).await;
        }
    }

    println!(
        "Decisions:       allowed {}, denied {}, degraded {}",
        counts.allowed(),
        counts.denied(),
        counts.degraded()
    );
    println!();

    Ok(())
}
