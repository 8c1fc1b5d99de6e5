use std::time::Duration;

/// Errors raised while building a limiter. These are fatal and only occur at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// The shard topology contained no stores.
    #[error("at least one store address is required")]
    EmptyTopology,

    /// The refill rate must be a finite, positive number of tokens per second.
    #[error("rate must be finite and greater than zero, got {0}")]
    InvalidRate(f64),

    /// The bucket capacity must be a finite, positive number of tokens.
    #[error("capacity must be finite and greater than zero, got {0}")]
    InvalidCapacity(f64),

    /// Idle buckets must live for at least a second.
    #[error("idle ttl must be at least one second, got {0:?}")]
    InvalidIdleTtl(Duration),

    /// A transition deadline of zero would fail every decision.
    #[error("transition timeout must be greater than zero, got {0:?}")]
    InvalidTransitionTimeout(Duration),

    /// A store address could not be parsed into a connection target.
    #[error("invalid store address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: redis::RedisError,
    },

    /// A store could not be reached while establishing the topology.
    #[error("failed to connect to store at {addr}: {reason}")]
    Connect { addr: String, reason: String },
}

/// Errors produced by a single bucket transition.
///
/// These never escape [`RateLimiter::decide`](crate::RateLimiter::decide); the
/// limiter resolves them through its [`FailurePolicy`](crate::FailurePolicy).
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    /// The store rejected the request or the connection failed.
    #[error("store request failed: {0}")]
    Store(#[from] redis::RedisError),

    /// The store is known to be unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The transition did not complete within the configured deadline.
    #[error("transition timed out after {0:?}")]
    Timeout(Duration),

    /// The transition returned something other than `(allowed, tokens)`.
    #[error("malformed transition result: {0}")]
    MalformedResult(String),
}

impl TransitionError {
    /// Returns `true` if the store answered, but with a result of the wrong shape.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedResult(_))
    }
}
