use velocity_limit::Decision;

/// Errors produced by the Tower Velocity middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VelocityError {
    /// The identity has used up its quota.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with `Retry-After` and `X-RateLimit-*` headers.
    #[error("Rate limit exceeded; retry after {retry_after_secs}s")]
    RateLimited {
        /// The configured bucket capacity.
        limit: u64,
        /// Tokens left, rounded.
        remaining: u64,
        /// Whole seconds the client should wait.
        retry_after_secs: u64,
    },

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl VelocityError {
    /// The rejection for a denied decision.
    pub fn rate_limited(decision: &Decision) -> Self {
        Self::RateLimited {
            limit: decision.limit_display(),
            remaining: decision.remaining_display(),
            retry_after_secs: decision.retry_after_secs.unwrap_or(1),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for VelocityError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        match self {
            Self::RateLimited {
                limit,
                remaining,
                retry_after_secs,
            } => {
                let body = serde_json::json!({
                    "error": "Rate limit exceeded",
                    "message": "Too many requests. Please try again later.",
                });
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
                crate::headers::insert_rejection(
                    response.headers_mut(),
                    limit,
                    remaining,
                    retry_after_secs,
                );
                response
            }
            Self::Inner(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
        }
    }
}
