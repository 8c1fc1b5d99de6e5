use std::net::SocketAddr;

use http::HeaderName;
use http::Request;

/// Identity used when a request carries nothing to identify it by.
pub const UNKNOWN_IDENTITY: &str = "unknown";

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Picks the identity a request is rate limited under.
pub trait KeyExtractor: Clone + Send + Sync + 'static {
    /// Returns `None` when the request carries no usable identity.
    fn extract<B>(&self, req: &Request<B>) -> Option<String>;
}

/// The peer's IP address.
///
/// Reads a [`SocketAddr`] request extension, or axum's `ConnectInfo` when the
/// `axum` feature is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerIp;

impl KeyExtractor for PeerIp {
    fn extract<B>(&self, req: &Request<B>) -> Option<String> {
        peer_addr(req).map(|addr| addr.ip().to_string())
    }
}

fn peer_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    #[cfg(feature = "axum")]
    let connected = req
        .extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    #[cfg(not(feature = "axum"))]
    let connected: Option<SocketAddr> = None;

    connected.or_else(|| req.extensions().get::<SocketAddr>().copied())
}

/// The client address reported by a reverse proxy.
///
/// Uses the first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer.
/// Only trust this behind a proxy that sets these headers itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedFor;

impl KeyExtractor for ForwardedFor {
    fn extract<B>(&self, req: &Request<B>) -> Option<String> {
        let headers = req.headers();
        let non_blank = |v: &str| {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        };
        headers
            .get(&X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(non_blank)
            .or_else(|| {
                headers
                    .get(&X_REAL_IP)
                    .and_then(|v| v.to_str().ok())
                    .and_then(non_blank)
            })
            .or_else(|| PeerIp.extract(req))
    }
}

/// The value of an arbitrary header, e.g. an API key or account id.
#[derive(Debug, Clone)]
pub struct HeaderKey(pub HeaderName);

impl KeyExtractor for HeaderKey {
    fn extract<B>(&self, req: &Request<B>) -> Option<String> {
        req.headers()
            .get(&self.0)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}
