use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use ::serde::Serialize;
use serde_with::serde_as;

use crate::Result;
use crate::error::{ConfigError, Error as RatelogError};
use crate::parser::LogFormat;
use crate::types::{KeyScope, PolicyKind};

mod defaults;
mod env;
mod raw;
mod serde;

pub(crate) use self::serde::HumantimeDuration;

const CACHE_SIZE_BOUNDS: RangeInclusive<usize> = 1..=4096;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub format: LogFormat,
    pub scope: KeyScope,
    pub policy: Policy,
    /// Ledgers kept by [`crate::cache::ReplayCache::for_config`]. Does not
    /// affect decisions, so it stays out of replay fingerprints.
    #[serde(skip)]
    pub cache_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Policy {
    LeakyBucket(BucketLimits),
    SlidingWindow(WindowLimits),
    FixedWindow(WindowLimits),
}

/// Run-wide bucket parameters with optional per-api-key overrides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketLimits {
    pub default: BucketParams,
    pub overrides: BTreeMap<String, BucketParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BucketParams {
    pub capacity: f64,
    /// Units drained per second.
    pub leak_rate: f64,
}

/// Window limits per api key. Keys without an entry are a configuration error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowLimits {
    pub keys: BTreeMap<String, KeyLimits>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyLimits {
    pub windows: Vec<RateLimit>,
    pub endpoints: BTreeMap<String, Vec<RateLimit>>,
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub max_events: usize,
    #[serde_as(as = "HumantimeDuration")]
    pub per: Duration,
}

/// Values that take precedence over both the file and the environment,
/// typically coming from the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub policy: Option<PolicyKind>,
    pub scope: Option<KeyScope>,
    pub capacity: Option<f64>,
    pub leak_rate: Option<f64>,
    pub record_separator: Option<char>,
    pub field_separator: Option<char>,
}

impl Config {
    /// Load configuration from a file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration file cannot be read, parsed,
    /// when environment overrides are invalid, or when the resulting values
    /// fail validation.
    pub fn from_env_and_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(path, &Overrides::default())
    }

    /// Same as [`Config::from_env_and_file`], with `overrides` applied last.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env_and_file`].
    pub fn load(path: impl AsRef<Path>, overrides: &Overrides) -> Result<Self> {
        let mut raw = raw::load(path).map_err(RatelogError::from)?;
        raw.apply_env_overrides().map_err(RatelogError::from)?;
        raw.apply_overrides(overrides);
        raw.validate_and_build()
    }

    pub fn leaky_bucket(capacity: f64, leak_rate: f64) -> Self {
        Self::with_policy(Policy::LeakyBucket(BucketLimits {
            default: BucketParams {
                capacity,
                leak_rate,
            },
            overrides: BTreeMap::new(),
        }))
    }

    pub fn sliding_window(limits: WindowLimits) -> Self {
        Self::with_policy(Policy::SlidingWindow(limits))
    }

    pub fn fixed_window(limits: WindowLimits) -> Self {
        Self::with_policy(Policy::FixedWindow(limits))
    }

    fn with_policy(policy: Policy) -> Self {
        Self {
            format: LogFormat::default(),
            scope: KeyScope::default(),
            policy,
            cache_size: defaults::default_cache_size(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: KeyScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub const fn policy_kind(&self) -> PolicyKind {
        match self.policy {
            Policy::LeakyBucket(_) => PolicyKind::LeakyBucket,
            Policy::SlidingWindow(_) => PolicyKind::SlidingWindow,
            Policy::FixedWindow(_) => PolicyKind::FixedWindow,
        }
    }

    /// Check invariants for configurations built in code.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] describing the first violation.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        LogFormat::new(self.format.record_separator, self.format.field_separator)?;
        if !CACHE_SIZE_BOUNDS.contains(&self.cache_size) {
            return Err(ConfigError::InvalidField {
                field: "cache.size",
                message: format!(
                    "expected between {} and {}, got {}",
                    CACHE_SIZE_BOUNDS.start(),
                    CACHE_SIZE_BOUNDS.end(),
                    self.cache_size
                ),
            });
        }
        match &self.policy {
            Policy::LeakyBucket(limits) => {
                limits.default.validate("leaky_bucket")?;
                for params in limits.overrides.values() {
                    params.validate("leaky_bucket.overrides")?;
                }
                Ok(())
            }
            Policy::SlidingWindow(limits) | Policy::FixedWindow(limits) => {
                limits.validate(self.scope)
            }
        }
    }
}

impl BucketLimits {
    pub fn params_for(&self, api_key: &str) -> &BucketParams {
        self.overrides.get(api_key).unwrap_or(&self.default)
    }
}

impl BucketParams {
    fn validate(&self, field: &'static str) -> std::result::Result<(), ConfigError> {
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(ConfigError::InvalidField {
                field,
                message: format!("capacity must be a positive number, got {}", self.capacity),
            });
        }
        if !self.leak_rate.is_finite() || self.leak_rate < 0.0 {
            return Err(ConfigError::InvalidField {
                field,
                message: format!("leak rate cannot be negative, got {}", self.leak_rate),
            });
        }
        Ok(())
    }
}

impl WindowLimits {
    #[must_use]
    pub fn with_key(mut self, api_key: impl Into<String>, windows: Vec<RateLimit>) -> Self {
        self.keys.entry(api_key.into()).or_default().windows = windows;
        self
    }

    #[must_use]
    pub fn with_endpoint(
        mut self,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        windows: Vec<RateLimit>,
    ) -> Self {
        self.keys
            .entry(api_key.into())
            .or_default()
            .endpoints
            .insert(endpoint.into(), windows);
        self
    }

    /// Windows that apply to `api_key` on `endpoint`. Fails closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownKey`] when neither an endpoint override
    /// nor key-level windows exist.
    pub fn resolve(
        &self,
        api_key: &str,
        endpoint: Option<&str>,
    ) -> std::result::Result<&[RateLimit], ConfigError> {
        let unknown = || ConfigError::UnknownKey {
            api_key: api_key.to_string(),
            endpoint: endpoint.map(str::to_string),
        };
        let limits = self.keys.get(api_key).ok_or_else(unknown)?;
        if let Some(windows) = endpoint.and_then(|e| limits.endpoints.get(e)) {
            return Ok(windows);
        }
        if limits.windows.is_empty() {
            return Err(unknown());
        }
        Ok(&limits.windows)
    }

    fn validate(&self, scope: KeyScope) -> std::result::Result<(), ConfigError> {
        if self.keys.is_empty() {
            return Err(ConfigError::MissingField { field: "limits" });
        }
        for (api_key, limits) in &self.keys {
            if limits.windows.is_empty() && limits.endpoints.is_empty() {
                return Err(ConfigError::InvalidField {
                    field: "limits",
                    message: format!("api key {api_key} has no windows"),
                });
            }
            if !limits.endpoints.is_empty() && !scope.includes_endpoint() {
                return Err(ConfigError::InvalidField {
                    field: "policy.scope",
                    message: format!(
                        "endpoint limits for {api_key} need a scope that includes the endpoint, got {scope}"
                    ),
                });
            }
            let all = limits
                .windows
                .iter()
                .chain(limits.endpoints.values().flatten());
            for limit in all {
                limit.validate()?;
            }
        }
        Ok(())
    }
}

impl RateLimit {
    pub const fn new(max_events: usize, per: Duration) -> Self {
        Self { max_events, per }
    }

    pub const fn per_minute(max_events: usize) -> Self {
        Self::new(max_events, Duration::from_secs(60))
    }

    pub const fn per_hour(max_events: usize) -> Self {
        Self::new(max_events, Duration::from_secs(3600))
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_events == 0 {
            return Err(ConfigError::InvalidField {
                field: "limits.windows.max_events",
                message: "rate limit must allow at least one event".to_string(),
            });
        }
        if self.per.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "limits.windows.per",
                message: "window duration must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, KeyLimits, RateLimit, WindowLimits};
    use crate::error::ConfigError;
    use crate::types::KeyScope;
    use std::time::Duration;

    fn limits() -> WindowLimits {
        WindowLimits::default()
            .with_key("sk_test_123", vec![RateLimit::per_minute(2), RateLimit::per_hour(3)])
            .with_endpoint("sk_test_123", "/v1/charges", vec![RateLimit::per_minute(1)])
    }

    #[test]
    fn resolve_prefers_endpoint_override() {
        let limits = limits();
        let charges = limits.resolve("sk_test_123", Some("/v1/charges"));
        assert_eq!(charges.ok(), Some(&[RateLimit::per_minute(1)][..]));
        let other = limits.resolve("sk_test_123", Some("/v1/customers"));
        assert_eq!(other.map(<[RateLimit]>::len).ok(), Some(2));
    }

    #[test]
    fn resolve_fails_closed_for_unknown_keys() {
        let limits = limits();
        let err = limits.resolve("sk_live_999", None);
        assert!(matches!(
            err,
            Err(ConfigError::UnknownKey { ref api_key, endpoint: None }) if api_key == "sk_live_999"
        ));

        let endpoint_only = WindowLimits::default().with_endpoint("k", "/a", vec![RateLimit::per_minute(1)]);
        assert!(endpoint_only.resolve("k", Some("/b")).is_err());
    }

    #[test]
    fn endpoint_limits_need_endpoint_scope() {
        let config = Config::sliding_window(limits());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField { field: "policy.scope", .. })
        ));
        assert!(config.with_scope(KeyScope::ApiKeyEndpoint).validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_values() {
        assert!(Config::leaky_bucket(0.0, 1.0).validate().is_err());
        assert!(Config::leaky_bucket(10.0, -1.0).validate().is_err());
        assert!(Config::leaky_bucket(f64::NAN, 1.0).validate().is_err());
        assert!(Config::leaky_bucket(30.0, 0.0).validate().is_ok());

        let zero = WindowLimits::default().with_key("k", vec![RateLimit::new(0, Duration::from_secs(60))]);
        assert!(Config::sliding_window(zero).validate().is_err());

        let empty = WindowLimits::default().with_key("k", Vec::new());
        assert!(Config::fixed_window(empty).validate().is_err());
        assert!(Config::fixed_window(WindowLimits::default()).validate().is_err());
    }

    #[test]
    fn key_limits_default_is_empty() {
        let limits = KeyLimits::default();
        assert!(limits.windows.is_empty() && limits.endpoints.is_empty());
    }
}
