use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransitionError;

/// Scalar arguments for one bucket transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionArgs {
    /// Tokens added per second.
    pub rate: f64,
    /// Maximum tokens a bucket holds.
    pub capacity: f64,
    /// Caller's clock, in seconds.
    pub now: f64,
    /// Tokens this request wants to consume.
    pub requested: f64,
    /// Idle period after which the store may discard the bucket.
    pub idle_ttl: Duration,
}

/// Outcome of a transition as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub allowed: bool,
    /// Tokens left in the bucket after the transition. Fractional.
    pub remaining: f64,
}

/// Persisted per-identity state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill: f64,
}

impl BucketState {
    /// The state of a bucket that has never been seen before.
    pub fn fresh(args: &TransitionArgs) -> Self {
        Self {
            tokens: args.capacity,
            last_refill: args.now,
        }
    }

    /// Refill, then try to consume, then stamp the refill clock.
    ///
    /// The clock advances even when the request is denied. A `now` earlier
    /// than the stored timestamp skips the refill rather than draining tokens.
    pub fn apply(&mut self, args: &TransitionArgs) -> Transition {
        let elapsed = args.now - self.last_refill;
        if elapsed > 0.0 {
            self.tokens = args.capacity.min(self.tokens + elapsed * args.rate);
        }

        let allowed = self.tokens >= args.requested;
        if allowed {
            self.tokens -= args.requested;
        }

        self.last_refill = args.now;

        Transition {
            allowed,
            remaining: self.tokens,
        }
    }
}

/// A store able to run the bucket transition atomically per key.
///
/// Implementations must make the read-refill-consume-write sequence of
/// [`BucketState::apply`] indivisible with respect to every other caller of
/// the same key, in this process or any other.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Run one transition against the bucket stored at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the store cannot be reached or its
    /// answer cannot be interpreted.
    async fn transition(
        &self,
        key: &str,
        args: &TransitionArgs,
    ) -> Result<Transition, TransitionError>;
}

#[async_trait]
impl<S> BucketStore for std::sync::Arc<S>
where
    S: BucketStore + ?Sized,
{
    async fn transition(
        &self,
        key: &str,
        args: &TransitionArgs,
    ) -> Result<Transition, TransitionError> {
        (**self).transition(key, args).await
    }
}
