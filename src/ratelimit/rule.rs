//! Rate limit rules.
//!
//! A [`Rule`] names one quota (window, limit, algorithm, behavior) held by the
//! remote quota service. Rules are immutable once built; every constructor
//! path, including deserialization, goes through [`Rule::new`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{LimitgateError, Result};
use crate::grpc::proto::gubernator::Algorithm as WireAlgorithm;

/// Quota algorithm evaluated by the quota service.
///
/// The client never branches on this; it is forwarded as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Up to `limit` hits per window; the counter resets at the window boundary.
    #[default]
    FixedWindow,
    /// Capacity drains continuously at `limit / window`.
    LeakyBucket,
}

impl Algorithm {
    /// Convert to the wire enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Algorithm::FixedWindow => WireAlgorithm::TokenBucket as i32,
            Algorithm::LeakyBucket => WireAlgorithm::LeakyBucket as i32,
        }
    }

    /// Convert from the wire enum value.
    pub fn from_proto(id: i32) -> Option<Self> {
        match WireAlgorithm::try_from(id).ok()? {
            WireAlgorithm::TokenBucket => Some(Algorithm::FixedWindow),
            WireAlgorithm::LeakyBucket => Some(Algorithm::LeakyBucket),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::FixedWindow => f.write_str("fixed_window"),
            Algorithm::LeakyBucket => f.write_str("leaky_bucket"),
        }
    }
}

/// A named quota policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleConfig", into = "RuleConfig")]
pub struct Rule {
    name: String,
    window: Duration,
    limit: i64,
    algorithm: Algorithm,
    behavior: i32,
}

impl Rule {
    /// Create a rule, rejecting an empty name, a zero window or a negative limit.
    pub fn new(
        name: impl Into<String>,
        window: Duration,
        limit: i64,
        algorithm: Algorithm,
        behavior: i32,
    ) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(LimitgateError::Config("rule name must not be empty".to_string()));
        }
        if window.as_millis() == 0 {
            return Err(LimitgateError::Config(format!(
                "rule {}: window must be at least one millisecond",
                name
            )));
        }
        if limit < 0 {
            return Err(LimitgateError::Config(format!(
                "rule {}: limit must not be negative",
                name
            )));
        }

        Ok(Self {
            name,
            window,
            limit,
            algorithm,
            behavior,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length as sent on the wire.
    pub fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Opaque behavior flags forwarded to the quota service.
    pub fn behavior(&self) -> i32 {
        self.behavior
    }
}

/// Serialized form of a [`Rule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub window_ms: u64,
    pub limit: i64,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub behavior: i32,
}

impl TryFrom<RuleConfig> for Rule {
    type Error = LimitgateError;

    fn try_from(config: RuleConfig) -> Result<Self> {
        Rule::new(
            config.name,
            Duration::from_millis(config.window_ms),
            config.limit,
            config.algorithm,
            config.behavior,
        )
    }
}

impl From<Rule> for RuleConfig {
    fn from(rule: Rule) -> Self {
        let window_ms = u64::try_from(rule.window.as_millis()).unwrap_or(u64::MAX);
        Self {
            name: rule.name,
            window_ms,
            limit: rule.limit,
            algorithm: rule.algorithm,
            behavior: rule.behavior,
        }
    }
}
