use std::time::Duration;

use crate::error::ConfigurationError;

/// Address used when no store is configured.
pub const DEFAULT_STORE_ADDRESS: &str = "localhost:6379";

/// Prefix prepended to every identity to form its bucket key.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit:";

/// How long an untouched bucket survives in the store.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(3600);

/// Shortest idle TTL a bucket may be given.
pub const MIN_IDLE_TTL: Duration = Duration::from_secs(1);

/// Upper bound on a single transition round trip.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(3);

/// What the limiter does when a transition fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Allow the request. Availability wins over strictness.
    #[default]
    FailOpen,
    /// Deny the request as if the bucket were empty.
    FailClosed,
}

/// Token bucket parameters shared by every identity.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    rate: f64,
    capacity: f64,
    requested: f64,
    key_prefix: String,
    idle_ttl: Duration,
    transition_timeout: Duration,
    failure_policy: FailurePolicy,
}

impl LimiterConfig {
    /// Create a config that refills `rate` tokens per second up to `capacity`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if either value is not finite and positive.
    pub fn new(rate: f64, capacity: f64) -> Result<Self, ConfigurationError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigurationError::InvalidRate(rate));
        }
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(ConfigurationError::InvalidCapacity(capacity));
        }
        Ok(Self {
            rate,
            capacity,
            requested: 1.0,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            idle_ttl: DEFAULT_IDLE_TTL,
            transition_timeout: DEFAULT_TRANSITION_TIMEOUT,
            failure_policy: FailurePolicy::default(),
        })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set how long an idle bucket is kept before the store discards it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidIdleTtl`] if `ttl` is shorter than
    /// one second. Stores expire keys with whole second resolution.
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Result<Self, ConfigurationError> {
        if ttl < MIN_IDLE_TTL {
            return Err(ConfigurationError::InvalidIdleTtl(ttl));
        }
        self.idle_ttl = ttl;
        Ok(self)
    }

    /// Set the deadline applied to every transition. Exceeding it counts as a store failure.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidTransitionTimeout`] if `timeout` is zero.
    pub fn with_transition_timeout(
        mut self,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        if timeout.is_zero() {
            return Err(ConfigurationError::InvalidTransitionTimeout(timeout));
        }
        self.transition_timeout = timeout;
        Ok(self)
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens consumed by one decision.
    pub fn requested(&self) -> f64 {
        self.requested
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn transition_timeout(&self) -> Duration {
        self.transition_timeout
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// The store key holding the bucket for `identity`.
    pub fn key_for(&self, identity: &str) -> String {
        format!("{}{}", self.key_prefix, identity)
    }
}

/// Ordered list of store addresses making up the shard topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreAddresses(Vec<String>);

impl StoreAddresses {
    /// Parse a comma separated address list, ignoring blank entries.
    ///
    /// An empty list falls back to [`DEFAULT_STORE_ADDRESS`].
    pub fn parse(list: &str) -> Self {
        let addresses: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if addresses.is_empty() {
            Self(vec![DEFAULT_STORE_ADDRESS.to_string()])
        } else {
            Self(addresses)
        }
    }

    /// Read `REDIS_ADDRS`, then `REDIS_ADDR`, then fall back to the default address.
    pub fn from_env() -> Self {
        let list = std::env::var("REDIS_ADDRS")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| std::env::var("REDIS_ADDR").ok())
            .unwrap_or_default();
        Self::parse(&list)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// The addresses as connection URLs, adding `redis://` where no scheme is given.
    pub fn urls(&self) -> impl Iterator<Item = String> + '_ {
        self.iter().map(|addr| {
            if addr.contains("://") {
                addr.to_string()
            } else {
                format!("redis://{addr}")
            }
        })
    }
}

impl Default for StoreAddresses {
    fn default() -> Self {
        Self(vec![DEFAULT_STORE_ADDRESS.to_string()])
    }
}
