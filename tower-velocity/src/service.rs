use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use futures::future::BoxFuture;
use http::Request;
use http::Response;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;

use velocity_limit::BucketStore;
use velocity_limit::Decision;
use velocity_limit::RateLimiter;

use crate::error::VelocityError;
use crate::headers;
use crate::key::KeyExtractor;
use crate::key::UNKNOWN_IDENTITY;

/// Consults a [`RateLimiter`] before every request.
///
/// Allowed requests reach the inner service and their responses carry the
/// `X-RateLimit-*` headers. Denied requests never reach it; the future fails
/// with [`VelocityError::RateLimited`]. Inner service errors surface as
/// [`VelocityError::Inner`].
#[derive(Debug)]
pub struct RateLimitService<S, St, K> {
    inner: S,
    limiter: Arc<RateLimiter<St>>,
    key: K,
}

// Manually implement Clone to avoid requiring `St: Clone`
impl<S, St, K> Clone for RateLimitService<S, St, K>
where
    S: Clone,
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            key: self.key.clone(),
        }
    }
}

impl<S, St, K> RateLimitService<S, St, K> {
    pub fn new(inner: S, limiter: Arc<RateLimiter<St>>, key: K) -> Self {
        Self {
            inner,
            limiter,
            key,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

/// Wrap an inner service error, leaving our own errors untouched.
fn wrap_inner<E: Into<BoxError>>(err: E) -> BoxError {
    let err = err.into();
    if let Some(velocity_err) = err.downcast_ref::<VelocityError>() {
        BoxError::from(velocity_err.clone())
    } else {
        Box::from(VelocityError::Inner(err.to_string()))
    }
}

pin_project! {
    #[project = StateProj]
    enum State<F, S, Req> {
        Deciding {
            decision: BoxFuture<'static, Decision>,
            pending: Option<(S, Req)>,
        },
        Calling {
            #[pin]
            fut: F,
            decision: Decision,
        },
    }
}

pin_project! {
    /// Waits for the rate limit decision, then for the inner service.
    pub struct ResponseFuture<F, S, Req> {
        #[pin]
        state: State<F, S, Req>,
    }
}

impl<F, S, Req, ResBody, E> Future for ResponseFuture<F, S, Req>
where
    S: Service<Req, Response = Response<ResBody>, Error = E, Future = F>,
    F: Future<Output = Result<Response<ResBody>, E>>,
    E: Into<BoxError>,
{
    type Output = Result<Response<ResBody>, BoxError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            let mut this = self.as_mut().project();
            match this.state.as_mut().project() {
                StateProj::Deciding { decision, pending } => {
                    let decision = ready!(decision.as_mut().poll(cx));
                    if !decision.allowed {
                        return Poll::Ready(Err(VelocityError::rate_limited(&decision).into()));
                    }
                    let Some((mut inner, req)) = pending.take() else {
                        panic!("ResponseFuture polled after completion");
                    };
                    let fut = inner.call(req);
                    this.state.set(State::Calling { fut, decision });
                }
                StateProj::Calling { fut, decision } => {
                    let mut response = ready!(fut.poll(cx)).map_err(wrap_inner)?;
                    headers::insert_decision(response.headers_mut(), decision);
                    return Poll::Ready(Ok(response));
                }
            }
        }
    }
}

impl<S, St, K, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S, St, K>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone,
    S::Error: Into<BoxError>,
    St: BucketStore + 'static,
    K: KeyExtractor,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future, S, Request<ReqBody>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(wrap_inner)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let identity = self.key.extract(&req).unwrap_or_else(|| {
            tracing::debug!("request carries no identity, using the shared bucket");
            UNKNOWN_IDENTITY.to_string()
        });

        let limiter = Arc::clone(&self.limiter);
        let decision: BoxFuture<'static, Decision> =
            Box::pin(async move { limiter.decide(&identity).await });

        // Hand the service that was polled ready to the future, keep a fresh clone.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        ResponseFuture {
            state: State::Deciding {
                decision,
                pending: Some((inner, req)),
            },
        }
    }
}
