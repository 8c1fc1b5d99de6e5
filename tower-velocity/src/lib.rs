//! # Tower Velocity
//!
//! `tower-velocity` puts a [`velocity_limit::RateLimiter`] in front of any
//! HTTP [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## The Middleware
//! [`RateLimitLayer`] takes the identity of each request from a
//! [`KeyExtractor`] (the peer IP by default) and asks the limiter for a
//! decision before the inner service sees the request:
//!
//! 1. **Allowed**: The request proceeds and the response carries
//!    `X-RateLimit-Limit` and `X-RateLimit-Remaining`.
//! 2. **Denied**: The inner service is skipped and the call fails with
//!    [`VelocityError::RateLimited`].
//! 3. **Store outage**: The limiter's failure policy decides. Under the
//!    default fail-open policy the request looks like any other allowed one.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`VelocityError`] (429 with
//!   `Retry-After`, or 500) and builds the `velocity-server` binary.

mod error;
pub mod headers;
mod key;
mod layer;
mod service;


pub use error::VelocityError;
pub use key::ForwardedFor;
pub use key::HeaderKey;
pub use key::KeyExtractor;
pub use key::PeerIp;
pub use key::UNKNOWN_IDENTITY;
pub use layer::RateLimitLayer;
pub use service::RateLimitService;
pub use service::ResponseFuture;
