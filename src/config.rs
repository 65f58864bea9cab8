//! Configuration management for limitgate.

use http::header::HeaderName;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{LimitgateError, Result};
use crate::grpc::RemoteLimiter;
use crate::ratelimit::{
    KeySource, MetricsReporter, MiddlewareOptions, RateLimitLayer, Rule, RuleEvaluator,
    DEFAULT_HIT_VALUE,
};

/// Prefix of environment variables overriding file settings,
/// e.g. `LIMITGATE__REMOTE__ADDRESS`.
pub const ENV_PREFIX: &str = "LIMITGATE";

/// Main configuration for limitgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitgateConfig {
    /// Quota service connection
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Named quota rules
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Guarded pipeline stages, by name
    #[serde(default)]
    pub guards: BTreeMap<String, GuardConfig>,
}

/// Quota service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// gRPC endpoint, e.g. `http://127.0.0.1:1051`
    #[serde(default = "default_address")]
    pub address: String,

    /// Deadline for each quota call in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Deadline for establishing the connection in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_address() -> String {
    "http://127.0.0.1:1051".to_string()
}

fn default_timeout_ms() -> u64 {
    200
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

/// One guarded pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Name of the rule to enforce
    pub rule: String,

    /// Where the entity key comes from
    pub key: KeySource,

    /// Hits charged per request
    #[serde(default = "default_hit_value")]
    pub hit_value: i64,

    /// Attach `Retry-After` to denials
    #[serde(default)]
    pub retry_hint: bool,

    /// Forward requests when the quota service cannot decide
    #[serde(default)]
    pub fail_open: bool,
}

fn default_hit_value() -> i64 {
    DEFAULT_HIT_VALUE
}

impl GuardConfig {
    pub fn options(&self) -> MiddlewareOptions {
        MiddlewareOptions {
            hit_value: self.hit_value,
            enable_retry_hint: self.retry_hint,
            fail_open: self.fail_open,
        }
    }
}

impl LimitgateConfig {
    /// Load configuration from a file, with `LIMITGATE__*` environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limitgate configuration");

        let config: LimitgateConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LimitgateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LimitgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LimitgateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-references and values that deserialization cannot.
    pub fn validate(&self) -> Result<()> {
        if self.remote.timeout_ms == 0 {
            return Err(LimitgateError::Config(
                "remote.timeout_ms must be greater than zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for rule in &self.rules {
            if !names.insert(rule.name()) {
                return Err(LimitgateError::Config(format!(
                    "duplicate rule name: {}",
                    rule.name()
                )));
            }
        }

        for (name, guard) in &self.guards {
            if !names.contains(guard.rule.as_str()) {
                return Err(LimitgateError::Config(format!(
                    "guard {} references unknown rule {}",
                    name, guard.rule
                )));
            }
            if guard.hit_value < 1 {
                return Err(LimitgateError::Config(format!(
                    "guard {}: hit_value must be at least 1",
                    name
                )));
            }
            match &guard.key {
                KeySource::Fixed(key) if key.is_empty() => {
                    return Err(LimitgateError::Config(format!(
                        "guard {}: fixed key must not be empty",
                        name
                    )));
                }
                KeySource::Header(header) => {
                    HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
                        LimitgateError::Config(format!(
                            "guard {}: invalid header {}: {}",
                            name, header, e
                        ))
                    })?;
                }
                KeySource::Fixed(_) => {}
            }
        }

        Ok(())
    }

    /// Get a rule by name.
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name() == name)
    }

    /// Build the middleware layer for the named guard.
    pub fn guard_layer(
        &self,
        name: &str,
        limiter: &RemoteLimiter,
        reporter: Arc<dyn MetricsReporter>,
    ) -> Result<RateLimitLayer> {
        let guard = self
            .guards
            .get(name)
            .ok_or_else(|| LimitgateError::Config(format!("unknown guard: {}", name)))?;
        let rule = self
            .rule(&guard.rule)
            .map(|rule| Arc::new(rule.clone()))
            .ok_or_else(|| LimitgateError::Config(format!("unknown rule: {}", guard.rule)))?;

        let layer = match &guard.key {
            KeySource::Fixed(key) => {
                let evaluator = RuleEvaluator::new(limiter.clone(), rule, key.clone())?
                    .with_reporter(reporter);
                RateLimitLayer::new(evaluator, guard.options())
            }
            KeySource::Header(header) => {
                let header = HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
                    LimitgateError::Config(format!("invalid header {}: {}", header, e))
                })?;
                RateLimitLayer::per_entity(limiter.clone(), rule, header, reporter, guard.options())
            }
        };

        info!(guard = %name, rule = %guard.rule, "Rate limit guard configured");
        Ok(layer)
    }
}
