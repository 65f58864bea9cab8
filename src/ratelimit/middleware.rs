//! Tower middleware enforcing a rate limit on an HTTP pipeline stage.
//!
//! Each request is charged `hit_value` against an [`Evaluator`]:
//! - allowed requests are forwarded untouched;
//! - denied requests get `429 Too Many Requests`, with `Retry-After` when the
//!   retry hint is enabled, and are never forwarded;
//! - when no decision can be made the request is forwarded if the layer fails
//!   open, otherwise answered with `500 Internal Server Error`;
//! - requests without a usable entity key get `400 Bad Request` whatever the
//!   failure policy, so dropping the key header never bypasses the quota.

use futures::future::BoxFuture;
use http::header::{HeaderName, RETRY_AFTER};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::evaluator::Evaluator;
use super::metrics::{FacadeReporter, MetricsReporter};
use super::remote::RuleEvaluator;
use super::rule::Rule;
use crate::error::{LimitgateError, Result};
use crate::grpc::RemoteLimiter;

/// Hits charged per request unless configured otherwise.
pub const DEFAULT_HIT_VALUE: i64 = 1;

/// Body of the response sent when the limiter fails closed.
pub const MIDDLEWARE_FAILED_BODY: &str = "rate-limit middleware failed";

/// Body of the response sent when the request carries no entity key.
pub const MISSING_KEY_BODY: &str = "missing rate limit key";

/// Where the entity key for a guarded stage comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// One literal key shared by every request, e.g. for global rules.
    Fixed(String),
    /// The value of a request header, e.g. a client token.
    Header(String),
}

/// Per-layer enforcement options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiddlewareOptions {
    /// Hits charged per request
    pub hit_value: i64,
    /// Attach `Retry-After` to denials
    pub enable_retry_hint: bool,
    /// Forward requests when the limiter cannot decide
    pub fail_open: bool,
}

impl Default for MiddlewareOptions {
    fn default() -> Self {
        Self {
            hit_value: DEFAULT_HIT_VALUE,
            enable_retry_hint: false,
            fail_open: false,
        }
    }
}

/// Which evaluator a request is charged against.
#[derive(Clone)]
enum Target {
    Shared(Arc<dyn Evaluator>),
    PerEntity {
        limiter: RemoteLimiter,
        rule: Arc<Rule>,
        header: HeaderName,
        reporter: Arc<dyn MetricsReporter>,
    },
}

impl Target {
    fn resolve(&self, headers: &HeaderMap) -> Result<Arc<dyn Evaluator>> {
        match self {
            Target::Shared(evaluator) => Ok(evaluator.clone()),
            Target::PerEntity {
                limiter,
                rule,
                header,
                reporter,
            } => {
                let key = match headers
                    .get(header)
                    .and_then(|value| value.to_str().ok())
                    .filter(|key| !key.is_empty())
                {
                    Some(key) => key,
                    None => {
                        let err = LimitgateError::MissingKey(header.to_string());
                        reporter.report(rule.name(), Some(&err), Duration::ZERO);
                        return Err(err);
                    }
                };
                let evaluator = RuleEvaluator::new(limiter.clone(), rule.clone(), key)?
                    .with_reporter(reporter.clone());
                Ok(Arc::new(evaluator))
            }
        }
    }
}

/// Result of applying the policy to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Forward,
    TooManyRequests { retry_after: Option<u64> },
    Failed,
    MissingKey,
}

struct Policy {
    target: Target,
    options: MiddlewareOptions,
}

impl Policy {
    async fn check(&self, headers: &HeaderMap) -> Verdict {
        let evaluator = match self.target.resolve(headers) {
            Ok(evaluator) => evaluator,
            Err(e) => {
                warn!(error = %e, "Request rejected without a rate limit key");
                return Verdict::MissingKey;
            }
        };

        match evaluator.evaluate_with_wait_time(self.options.hit_value).await {
            Err(e) => {
                warn!(
                    error = %e,
                    fail_open = self.options.fail_open,
                    "rate limit middleware failed"
                );
                if self.options.fail_open {
                    Verdict::Forward
                } else {
                    Verdict::Failed
                }
            }
            Ok(decision) if decision.allowed => Verdict::Forward,
            Ok(decision) => {
                debug!(
                    wait_ms = decision.wait_time.as_millis() as u64,
                    "Request rejected by rate limit"
                );
                Verdict::TooManyRequests {
                    retry_after: self
                        .options
                        .enable_retry_hint
                        .then(|| retry_after_secs(decision.wait_time)),
                }
            }
        }
    }
}

/// Whole seconds to advertise in `Retry-After`, rounded up.
pub fn retry_after_secs(wait_time: Duration) -> u64 {
    wait_time.as_secs() + u64::from(wait_time.subsec_nanos() > 0)
}

/// A layer that guards the wrapped service with a rate limit.
#[derive(Clone)]
pub struct RateLimitLayer {
    policy: Arc<Policy>,
}

impl RateLimitLayer {
    /// Charge every request against one shared evaluator.
    pub fn new<E: Evaluator + 'static>(evaluator: E, options: MiddlewareOptions) -> Self {
        Self::from_target(Target::Shared(Arc::new(evaluator)), options)
    }

    /// Charge each request against `rule`, keyed by the value of `header`.
    ///
    /// A request without the header is rejected with `400 Bad Request`,
    /// even when the layer fails open.
    pub fn per_entity(
        limiter: RemoteLimiter,
        rule: Arc<Rule>,
        header: HeaderName,
        reporter: Arc<dyn MetricsReporter>,
        options: MiddlewareOptions,
    ) -> Self {
        Self::from_target(
            Target::PerEntity {
                limiter,
                rule,
                header,
                reporter,
            },
            options,
        )
    }

    /// [`RateLimitLayer::per_entity`] reporting through the metrics facade.
    pub fn per_entity_default(
        limiter: RemoteLimiter,
        rule: Arc<Rule>,
        header: HeaderName,
        options: MiddlewareOptions,
    ) -> Self {
        Self::per_entity(limiter, rule, header, Arc::new(FacadeReporter), options)
    }

    fn from_target(target: Target, options: MiddlewareOptions) -> Self {
        Self {
            policy: Arc::new(Policy { target, options }),
        }
    }

    pub fn options(&self) -> MiddlewareOptions {
        self.policy.options
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            policy: self.policy.clone(),
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    policy: Arc<Policy>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: From<&'static str> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let policy = self.policy.clone();
        // Keep the service that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let verdict = policy.check(req.headers()).await;
            match verdict {
                Verdict::Forward => inner.call(req).await,
                Verdict::TooManyRequests { retry_after } => Ok(too_many_requests(retry_after)),
                Verdict::Failed => Ok(middleware_failed()),
                Verdict::MissingKey => Ok(missing_key()),
            }
        })
    }
}

fn too_many_requests<B: From<&'static str>>(retry_after: Option<u64>) -> Response<B> {
    let mut response = Response::new(B::from(""));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    if let Some(secs) = retry_after {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

fn middleware_failed<B: From<&'static str>>() -> Response<B> {
    let mut response = Response::new(B::from(MIDDLEWARE_FAILED_BODY));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

fn missing_key<B: From<&'static str>>() -> Response<B> {
    let mut response = Response::new(B::from(MISSING_KEY_BODY));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}
