//! Observability for quota service calls.
//!
//! Reporters only observe; nothing they do can change a decision or fail a
//! request.

use std::time::Duration;

use crate::error::LimitgateError;

/// Histogram of quota service call latency in seconds.
pub const CALL_DURATION_METRIC: &str = "limitgate_remote_call_duration_seconds";
/// Counter of failed quota service calls.
pub const CALL_ERRORS_METRIC: &str = "limitgate_remote_call_errors_total";
/// Label carrying the rule name.
pub const LABEL_RULE_NAME: &str = "rule_name";

/// Sink for per-rule call latency and errors.
pub trait MetricsReporter: Send + Sync {
    /// Record one call against `rule_name`.
    fn report(&self, rule_name: &str, error: Option<&LimitgateError>, elapsed: Duration);
}

/// Records through the global [`metrics`] recorder.
///
/// With no recorder installed every call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeReporter;

impl MetricsReporter for FacadeReporter {
    fn report(&self, rule_name: &str, error: Option<&LimitgateError>, elapsed: Duration) {
        if error.is_some() {
            metrics::counter!(CALL_ERRORS_METRIC, LABEL_RULE_NAME => rule_name.to_string())
                .increment(1);
        }

        metrics::histogram!(CALL_DURATION_METRIC, LABEL_RULE_NAME => rule_name.to_string())
            .record(elapsed.as_secs_f64());
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl MetricsReporter for NoopReporter {
    fn report(&self, _rule_name: &str, _error: Option<&LimitgateError>, _elapsed: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_reporter_without_recorder() {
        let reporter = FacadeReporter;
        reporter.report("bulk", None, Duration::from_millis(3));
        reporter.report(
            "bulk",
            Some(&LimitgateError::Timeout(Duration::from_millis(200))),
            Duration::from_millis(200),
        );
    }
}
