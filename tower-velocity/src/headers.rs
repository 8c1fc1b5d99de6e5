use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::header::RETRY_AFTER;

use velocity_limit::Decision;

pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub static X_RATELIMIT_RETRY_AFTER: HeaderName =
    HeaderName::from_static("x-ratelimit-retry-after");

/// Stamp limit and remaining on a response that was let through.
pub fn insert_decision(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(
        X_RATELIMIT_LIMIT.clone(),
        HeaderValue::from(decision.limit_display()),
    );
    headers.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(decision.remaining_display()),
    );
}

/// Stamp the full set of headers on a rejection.
pub fn insert_rejection(
    headers: &mut HeaderMap,
    limit: u64,
    remaining: u64,
    retry_after_secs: u64,
) {
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
    headers.insert(
        X_RATELIMIT_RETRY_AFTER.clone(),
        HeaderValue::from(retry_after_secs),
    );
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
}
