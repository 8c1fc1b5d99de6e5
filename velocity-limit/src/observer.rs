use std::fmt::Debug;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;

use crate::TransitionError;
use crate::limiter::Decision;

/// Receives every decision the limiter makes.
///
/// Observers are called inline on the request path and must not block.
pub trait DecisionObserver: Debug + Send + Sync {
    fn on_allowed(&self, _identity: &str, _decision: &Decision) {}

    fn on_denied(&self, _identity: &str, _decision: &Decision) {}

    /// A decision made by the failure policy because the transition failed.
    fn on_degraded(&self, _identity: &str, _decision: &Decision, _error: &TransitionError) {}
}

/// Logs decisions with `tracing` and counts them with OpenTelemetry.
#[derive(Clone, Debug)]
pub struct TracingObserver {
    decisions: Counter<u64>,
}

impl TracingObserver {
    pub fn new() -> Self {
        let meter = global::meter("velocity_limit");
        Self {
            decisions: meter
                .u64_counter("velocity.decisions")
                .with_description("rate limit decisions by outcome")
                .build(),
        }
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionObserver for TracingObserver {
    fn on_allowed(&self, identity: &str, decision: &Decision) {
        tracing::debug!(
            identity,
            remaining = decision.remaining,
            limit = decision.limit,
            "rate limit decision: allowed"
        );
        self.decisions
            .add(1, &[KeyValue::new("outcome", "allowed")]);
    }

    fn on_denied(&self, identity: &str, decision: &Decision) {
        tracing::info!(
            identity,
            remaining = decision.remaining,
            limit = decision.limit,
            retry_after_secs = ?decision.retry_after_secs,
            "rate limit decision: blocked"
        );
        self.decisions.add(1, &[KeyValue::new("outcome", "denied")]);
    }

    fn on_degraded(&self, identity: &str, decision: &Decision, error: &TransitionError) {
        tracing::error!(
            identity,
            allowed = decision.allowed,
            remaining = decision.remaining,
            limit = decision.limit,
            retry_after_secs = ?decision.retry_after_secs,
            %error,
            "rate limiter transition failed, applying failure policy"
        );
        self.decisions
            .add(1, &[KeyValue::new("outcome", "degraded")]);
    }
}

/// Counts decisions with atomics. Useful in tests and load generators.
#[derive(Debug, Default)]
pub struct CountingObserver {
    allowed: AtomicU64,
    denied: AtomicU64,
    degraded: AtomicU64,
}

impl CountingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allowed decisions that came from the store.
    pub fn allowed(&self) -> u64 {
        self.allowed.load(Ordering::Relaxed)
    }

    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }

    pub fn degraded(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }
}

impl DecisionObserver for CountingObserver {
    fn on_allowed(&self, _identity: &str, _decision: &Decision) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_denied(&self, _identity: &str, _decision: &Decision) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    fn on_degraded(&self, _identity: &str, _decision: &Decision, _error: &TransitionError) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }
}
