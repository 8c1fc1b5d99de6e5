use std::sync::Arc;

use tower::Layer;

use velocity_limit::RateLimiter;

use crate::key::KeyExtractor;
use crate::key::PeerIp;
use crate::service::RateLimitService;

/// Applies per-identity rate limits to HTTP requests.
#[derive(Debug)]
pub struct RateLimitLayer<St, K = PeerIp> {
    limiter: Arc<RateLimiter<St>>,
    key: K,
}

impl<St, K> Clone for RateLimitLayer<St, K>
where
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            key: self.key.clone(),
        }
    }
}

impl<St> RateLimitLayer<St, PeerIp> {
    /// Create a RateLimitLayer keyed by the peer's IP address.
    pub fn new(limiter: Arc<RateLimiter<St>>) -> Self {
        RateLimitLayer {
            limiter,
            key: PeerIp,
        }
    }
}

impl<St, K> RateLimitLayer<St, K> {
    /// Choose how the identity is taken from each request.
    pub fn with_key<K2: KeyExtractor>(self, key: K2) -> RateLimitLayer<St, K2> {
        RateLimitLayer {
            limiter: self.limiter,
            key,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter<St>> {
        &self.limiter
    }
}

impl<S, St, K> Layer<S> for RateLimitLayer<St, K>
where
    K: Clone,
{
    type Service = RateLimitService<S, St, K>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService::new(service, self.limiter.clone(), self.key.clone())
    }
}
