//! Rate limit rules, evaluation and enforcement.

mod evaluator;
mod metrics;
mod middleware;
mod remote;
mod rule;

pub use evaluator::{Decision, Evaluator, OverLimitError};
pub use metrics::{
    FacadeReporter, MetricsReporter, NoopReporter, CALL_DURATION_METRIC, CALL_ERRORS_METRIC,
    LABEL_RULE_NAME,
};
pub use middleware::{
    retry_after_secs, KeySource, MiddlewareOptions, RateLimitLayer, RateLimitService,
    DEFAULT_HIT_VALUE, MIDDLEWARE_FAILED_BODY, MISSING_KEY_BODY,
};
pub use remote::RuleEvaluator;
pub use rule::{Algorithm, Rule, RuleConfig};
