use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use clap::Parser;
use serde_json::json;
use tower::BoxError;
use tower::ServiceBuilder;
use tracing_subscriber::EnvFilter;

use tower_velocity::RateLimitLayer;
use tower_velocity::VelocityError;
use velocity_limit::FailurePolicy;
use velocity_limit::LimiterConfig;
use velocity_limit::RateLimiter;
use velocity_limit::RedisStore;
use velocity_limit::StoreAddresses;

#[derive(Parser, Debug)]
#[command(name = "velocity-server")]
#[command(about = "HTTP service protected by a distributed, sharded rate limiter")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Comma separated redis shards, e.g. "redis-a:6379,redis-b:6379"
    #[arg(long, env = "REDIS_ADDRS")]
    redis_addrs: Option<String>,

    /// Single redis address, used when no shard list is given
    #[arg(long, env = "REDIS_ADDR")]
    redis_addr: Option<String>,

    /// Tokens added per second
    #[arg(long, env = "RATE", default_value_t = 5.0)]
    rate: f64,

    /// Bucket capacity
    #[arg(long, env = "CAPACITY", default_value_t = 10.0)]
    capacity: f64,

    /// Deny requests instead of allowing them when redis is unreachable
    #[arg(long, env = "FAIL_CLOSED")]
    fail_closed: bool,

    /// Deadline for each redis round trip
    #[arg(long, env = "TRANSITION_TIMEOUT", default_value = "3s", value_parser = humantime::parse_duration)]
    transition_timeout: Duration,
}

impl Args {
    fn addresses(&self) -> StoreAddresses {
        let list = self
            .redis_addrs
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .or(self.redis_addr.as_deref())
            .unwrap_or_default();
        StoreAddresses::parse(list)
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let policy = if args.fail_closed {
        FailurePolicy::FailClosed
    } else {
        FailurePolicy::FailOpen
    };
    let config = LimiterConfig::new(args.rate, args.capacity)?
        .with_failure_policy(policy)
        .with_transition_timeout(args.transition_timeout)?;

    let shards = RedisStore::connect_all(&args.addresses()).await?;
    let limiter = Arc::new(RateLimiter::new(shards, config)?);

    let app = Router::new()
        .route("/api/resource", get(resource))
        .route_layer(
            ServiceBuilder::new()
                // Turn rejections into 429 responses
                .layer(HandleErrorLayer::new(handle_velocity_error))
                .layer(RateLimitLayer::new(limiter)),
        )
        .route("/health", get(health))
        .route("/", get(root));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    tracing::info!(port = args.port, "server starting");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn handle_velocity_error(err: BoxError) -> Response {
    if let Some(velocity_err) = err.downcast_ref::<VelocityError>() {
        velocity_err.clone().into_response()
    } else {
        tracing::error!(error = %err, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "velocity-rate-limiter",
    }))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Velocity Rate Limiter API",
    }))
}

async fn resource() -> impl IntoResponse {
    Json(json!({
        "message": "Resource accessed successfully",
        "data": "This is a protected resource",
    }))
}
