use std::sync::Arc;
use std::time::Duration;

use crate::bucket::BucketStore;
use crate::bucket::Transition;
use crate::bucket::TransitionArgs;
use crate::clock::WallClock;
use crate::config::FailurePolicy;
use crate::config::LimiterConfig;
use crate::error::ConfigurationError;
use crate::error::TransitionError;
use crate::observer::DecisionObserver;
use crate::observer::TracingObserver;
use crate::router::ShardRouter;

/// The verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Tokens left for this identity. Fractional.
    pub remaining: f64,
    /// The configured bucket capacity.
    pub limit: f64,
    /// Whole seconds to wait before retrying. Only set when denied.
    pub retry_after_secs: Option<u64>,
    /// `true` when the store could not be consulted and the failure policy decided.
    pub degraded: bool,
}

impl Decision {
    /// `remaining` rounded for display.
    pub fn remaining_display(&self) -> u64 {
        self.remaining.max(0.0).round() as u64
    }

    /// `limit` rounded for display.
    pub fn limit_display(&self) -> u64 {
        self.limit.max(0.0).round() as u64
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs.map(Duration::from_secs)
    }
}

/// Seconds until `requested` tokens are available again, never less than one.
fn retry_after_secs(requested: f64, remaining: f64, rate: f64) -> u64 {
    let needed = (requested - remaining).max(0.0);
    let secs = (needed / rate).ceil();
    if secs.is_finite() {
        (secs as u64).max(1)
    } else {
        1
    }
}

/// Decides whether requests from an identity may proceed.
///
/// Each decision routes the identity to its shard and runs one atomic bucket
/// transition there. All correctness under concurrency comes from the store;
/// the limiter holds no per-identity state and is cheap to share via `Arc`.
#[derive(Debug)]
pub struct RateLimiter<S> {
    router: ShardRouter<S>,
    config: LimiterConfig,
    clock: WallClock,
    observer: Arc<dyn DecisionObserver>,
}

impl<S> RateLimiter<S>
where
    S: BucketStore,
{
    /// Build a limiter over an ordered shard topology.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::EmptyTopology`] if `shards` is empty.
    pub fn new(shards: Vec<S>, config: LimiterConfig) -> Result<Self, ConfigurationError> {
        let router = ShardRouter::new(shards)?;
        tracing::info!(
            shards = router.len(),
            rate = config.rate(),
            capacity = config.capacity(),
            policy = ?config.failure_policy(),
            "rate limiter configured"
        );
        Ok(Self {
            router,
            config,
            clock: WallClock::new(),
            observer: Arc::new(TracingObserver::new()),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn DecisionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn router(&self) -> &ShardRouter<S> {
        &self.router
    }

    /// Decide on a request from `identity`, applying the failure policy if
    /// the store cannot be consulted. Never fails.
    pub async fn decide(&self, identity: &str) -> Decision {
        match self.transition(identity).await {
            Ok(transition) => self.report(identity, transition),
            Err(error) => self.degrade(identity, error),
        }
    }

    /// Decide on a request from `identity` without the failure policy.
    ///
    /// # Errors
    ///
    /// Returns the [`TransitionError`] if the store cannot be consulted.
    pub async fn try_decide(&self, identity: &str) -> Result<Decision, TransitionError> {
        let transition = self.transition(identity).await?;
        Ok(self.report(identity, transition))
    }

    async fn transition(&self, identity: &str) -> Result<Transition, TransitionError> {
        let args = TransitionArgs {
            rate: self.config.rate(),
            capacity: self.config.capacity(),
            now: self.clock.now(),
            requested: self.config.requested(),
            idle_ttl: self.config.idle_ttl(),
        };
        let key = self.config.key_for(identity);
        let store = self.router.shard(identity);
        let timeout = self.config.transition_timeout();

        tokio::time::timeout(timeout, store.transition(&key, &args))
            .await
            .unwrap_or(Err(TransitionError::Timeout(timeout)))
    }

    fn report(&self, identity: &str, transition: Transition) -> Decision {
        let decision = self.translate(transition);
        if decision.allowed {
            self.observer.on_allowed(identity, &decision);
        } else {
            self.observer.on_denied(identity, &decision);
        }
        decision
    }

    fn translate(&self, transition: Transition) -> Decision {
        let retry_after_secs = (!transition.allowed).then(|| {
            retry_after_secs(
                self.config.requested(),
                transition.remaining,
                self.config.rate(),
            )
        });
        Decision {
            allowed: transition.allowed,
            remaining: transition.remaining,
            limit: self.config.capacity(),
            retry_after_secs,
            degraded: false,
        }
    }

    fn degrade(&self, identity: &str, error: TransitionError) -> Decision {
        let decision = match self.config.failure_policy() {
            FailurePolicy::FailOpen => Decision {
                allowed: true,
                remaining: self.config.capacity(),
                limit: self.config.capacity(),
                retry_after_secs: None,
                degraded: true,
            },
            FailurePolicy::FailClosed => Decision {
                allowed: false,
                remaining: 0.0,
                limit: self.config.capacity(),
                retry_after_secs: Some(retry_after_secs(
                    self.config.requested(),
                    0.0,
                    self.config.rate(),
                )),
                degraded: true,
            },
        };
        self.observer.on_degraded(identity, &decision, &error);
        decision
    }
}
