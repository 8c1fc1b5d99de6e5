//! # velocity-limit
//!
//! `velocity-limit` enforces per-identity token bucket limits shared by any
//! number of stateless service instances, with Redis as the single source of
//! truth.
//!
//! ## Core Philosophy
//!
//! The limiter keeps no bucket state in process. Every decision is one atomic
//! transition (refill, check, consume, write back) executed by the store, so
//! correctness under contention is the store's per-key serialization and
//! nothing else. Identities are spread over several stores by a deterministic
//! FNV-1a shard router.
//!
//! ## Key Concepts
//!
//! * **Lazy Refill**: Tokens are recalculated at the moment of the request;
//!   there are no background timers.
//! * **Store Trait**: [`BucketStore`] abstracts the atomic transition.
//!   [`RedisStore`] runs it as a Lua script, [`MemoryStore`] under a map lock.
//! * **Failure Policy**: A store outage never fails a request. The limiter
//!   fails open by default, or closed if configured, and reports it.
//!
//! ## Example
//!
//! ```rust
//! use velocity_limit::LimiterConfig;
//! use velocity_limit::MemoryStore;
//! use velocity_limit::RateLimiter;
//!
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let config = LimiterConfig::new(5.0, 10.0).unwrap();
//! let limiter = RateLimiter::new(vec![MemoryStore::new()], config).unwrap();
//!
//! if limiter.decide("10.0.0.1").await.allowed {
//!     // Request allowed
//! }
//! # }
//! ```

mod bucket;
mod clock;
mod config;
mod error;
mod limiter;
mod memory;
mod observer;
mod redis_store;
mod router;

pub use bucket::BucketState;
pub use bucket::BucketStore;
pub use bucket::Transition;
pub use bucket::TransitionArgs;
pub use clock::WallClock;
pub use config::DEFAULT_IDLE_TTL;
pub use config::DEFAULT_KEY_PREFIX;
pub use config::DEFAULT_STORE_ADDRESS;
pub use config::DEFAULT_TRANSITION_TIMEOUT;
pub use config::FailurePolicy;
pub use config::LimiterConfig;
pub use config::StoreAddresses;
pub use error::ConfigurationError;
pub use error::TransitionError;
pub use limiter::Decision;
pub use limiter::RateLimiter;
pub use memory::MemoryStore;
pub use observer::CountingObserver;
pub use observer::DecisionObserver;
pub use observer::TracingObserver;
pub use redis_store::DIAL_TIMEOUT;
pub use redis_store::RedisStore;
pub use router::ShardRouter;
pub use router::fnv1a_32;
