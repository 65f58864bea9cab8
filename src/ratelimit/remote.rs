//! Evaluator bound to a rule, an entity key and the quota service.
//!
//! All counting happens remotely. The only local logic is building the
//! request envelope and turning the service's absolute reset instant into a
//! relative wait time; under the fixed-window algorithm that is the rest of
//! the current window, under leaky-bucket it is roughly `window / limit`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use super::evaluator::{Decision, Evaluator};
use super::metrics::{FacadeReporter, MetricsReporter};
use super::rule::Rule;
use crate::error::{LimitgateError, Result};
use crate::grpc::{QuotaStatus, RateLimitReq, RateLimitResp, RemoteLimiter};

/// Evaluates one rule for one entity against the quota service.
pub struct RuleEvaluator {
    limiter: RemoteLimiter,
    rule: Arc<Rule>,
    key: String,
    reporter: Arc<dyn MetricsReporter>,
}

impl RuleEvaluator {
    /// Bind `rule` to `key`.
    ///
    /// An empty key would fold every entity onto one counter and is rejected.
    pub fn new(limiter: RemoteLimiter, rule: Arc<Rule>, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(LimitgateError::EmptyKey);
        }

        Ok(Self {
            limiter,
            rule,
            key,
            reporter: Arc::new(FacadeReporter),
        })
    }

    /// Replace the metrics reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn MetricsReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Build the wire request charging `hits`.
    fn request(&self, hits: i64) -> RateLimitReq {
        RateLimitReq {
            name: self.rule.name().to_string(),
            unique_key: self.key.clone(),
            hits,
            limit: self.rule.limit(),
            duration: self.rule.window_millis(),
            algorithm: self.rule.algorithm().to_proto(),
            behavior: self.rule.behavior(),
            ..Default::default()
        }
    }

    async fn evaluate(&self, hits: i64) -> Result<Decision> {
        let resp = self.limiter.get_rate_limit(self.request(hits)).await?;
        interpret(&resp, chrono::Utc::now().timestamp_millis())
    }
}

#[async_trait]
impl Evaluator for RuleEvaluator {
    #[instrument(
        level = "debug",
        skip(self),
        fields(rule = %self.rule.name(), key = %self.key)
    )]
    async fn evaluate_with_wait_time(&self, hits: i64) -> Result<Decision> {
        let started = Instant::now();
        let result = self.evaluate(hits).await;
        self.reporter
            .report(self.rule.name(), result.as_ref().err(), started.elapsed());

        match &result {
            Ok(decision) => debug!(
                allowed = decision.allowed,
                wait_ms = decision.wait_time.as_millis() as u64,
                "Rate limit evaluated"
            ),
            Err(e) => debug!(error = %e, "Rate limit evaluation failed"),
        }

        result
    }
}

/// Map a quota service result onto a decision, relative to `now_ms`.
fn interpret(resp: &RateLimitResp, now_ms: i64) -> Result<Decision> {
    match QuotaStatus::try_from(resp.status) {
        Ok(QuotaStatus::UnderLimit) => Ok(Decision::allowed()),
        Ok(QuotaStatus::OverLimit) => Ok(Decision::denied(wait_time_until(resp.reset_time, now_ms))),
        Err(_) => Err(LimitgateError::Protocol(format!(
            "unknown rate limit status {}",
            resp.status
        ))),
    }
}

/// Time from `now_ms` until `reset_time_ms`; zero once the instant has passed.
fn wait_time_until(reset_time_ms: i64, now_ms: i64) -> Duration {
    u64::try_from(reset_time_ms.saturating_sub(now_ms))
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
}
