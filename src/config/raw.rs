use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde_with::serde_as;

use crate::Result;
use crate::error::ConfigError;
use crate::parser::LogFormat;
use crate::types::{KeyScope, PolicyKind};

use super::defaults::{
    default_cache_size, default_field_separator, default_policy, default_record_separator,
    default_scope,
};
use super::env::{env_parse, env_string, single_char};
use super::{
    BucketLimits, BucketParams, Config, HumantimeDuration, KeyLimits, Overrides, Policy,
    RateLimit, WindowLimits,
};

pub(super) fn load(path: impl AsRef<Path>) -> std::result::Result<RawConfig, ConfigError> {
    let path = path.as_ref();
    let mut builder = ::config::Config::builder();
    if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        builder = builder.add_source(::config::File::from_str(
            &contents,
            ::config::FileFormat::Toml,
        ));
    }
    builder = builder.add_source(
        ::config::Environment::with_prefix("RATELOG")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .map_err(|err| ConfigError::Parse(err.to_string()))?
        .try_deserialize()
        .map_err(|err| ConfigError::Parse(err.to_string()))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub(super) log: RawLog,
    #[serde(default)]
    pub(super) policy: RawPolicy,
    #[serde(default)]
    pub(super) leaky_bucket: RawLeakyBucket,
    #[serde(default)]
    pub(super) limits: Vec<RawKeyLimits>,
    #[serde(default)]
    pub(super) cache: RawCache,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawLog {
    #[serde(default = "default_record_separator")]
    pub(super) record_separator: String,
    #[serde(default = "default_field_separator")]
    pub(super) field_separator: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawPolicy {
    #[serde(default = "default_policy")]
    pub(super) kind: String,
    #[serde(default = "default_scope")]
    pub(super) scope: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RawLeakyBucket {
    #[serde(default)]
    pub(super) capacity: Option<f64>,
    #[serde(default)]
    pub(super) leak_rate: Option<f64>,
    #[serde(default)]
    pub(super) overrides: Vec<RawBucketOverride>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawBucketOverride {
    pub(super) api_key: String,
    pub(super) capacity: f64,
    pub(super) leak_rate: f64,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawKeyLimits {
    pub(super) api_key: String,
    #[serde(default)]
    pub(super) windows: Vec<RawRateLimit>,
    #[serde(default)]
    pub(super) endpoints: Vec<RawEndpointLimits>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawEndpointLimits {
    pub(super) endpoint: String,
    #[serde(default)]
    pub(super) windows: Vec<RawRateLimit>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(super) struct RawRateLimit {
    pub(super) max_events: usize,
    #[serde_as(as = "HumantimeDuration")]
    pub(super) per: Duration,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawCache {
    #[serde(default = "default_cache_size")]
    pub(super) size: usize,
}

impl RawConfig {
    pub(super) fn apply_env_overrides(&mut self) -> std::result::Result<(), ConfigError> {
        if let Some(kind) = env_string("RATELOG_POLICY")? {
            self.policy.kind = kind;
        }
        if let Some(scope) = env_string("RATELOG_SCOPE")? {
            self.policy.scope = scope;
        }
        if let Some(capacity) = env_parse::<f64>("RATELOG_CAPACITY")? {
            self.leaky_bucket.capacity = Some(capacity);
        }
        if let Some(leak_rate) = env_parse::<f64>("RATELOG_LEAK_RATE")? {
            self.leaky_bucket.leak_rate = Some(leak_rate);
        }
        if let Some(sep) = env_parse::<char>("RATELOG_RECORD_SEPARATOR")? {
            self.log.record_separator = sep.to_string();
        }
        if let Some(sep) = env_parse::<char>("RATELOG_FIELD_SEPARATOR")? {
            self.log.field_separator = sep.to_string();
        }
        if let Some(size) = env_parse::<usize>("RATELOG_CACHE_SIZE")? {
            self.cache.size = size;
        }
        Ok(())
    }

    pub(super) fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(kind) = overrides.policy {
            self.policy.kind = kind.as_str().to_string();
        }
        if let Some(scope) = overrides.scope {
            self.policy.scope = scope.as_str().to_string();
        }
        if let Some(capacity) = overrides.capacity {
            self.leaky_bucket.capacity = Some(capacity);
        }
        if let Some(leak_rate) = overrides.leak_rate {
            self.leaky_bucket.leak_rate = Some(leak_rate);
        }
        if let Some(sep) = overrides.record_separator {
            self.log.record_separator = sep.to_string();
        }
        if let Some(sep) = overrides.field_separator {
            self.log.field_separator = sep.to_string();
        }
    }

    pub(super) fn validate_and_build(self) -> Result<Config> {
        let format = LogFormat::new(
            single_char("log.record_separator", &self.log.record_separator)?,
            single_char("log.field_separator", &self.log.field_separator)?,
        )?;
        let kind = PolicyKind::from_str(&self.policy.kind).map_err(|message| {
            ConfigError::InvalidField {
                field: "policy.kind",
                message,
            }
        })?;
        let scope = KeyScope::from_str(&self.policy.scope).map_err(|message| {
            ConfigError::InvalidField {
                field: "policy.scope",
                message,
            }
        })?;

        let policy = match kind {
            PolicyKind::LeakyBucket => Policy::LeakyBucket(self.leaky_bucket.build()?),
            PolicyKind::SlidingWindow => Policy::SlidingWindow(build_limits(self.limits)?),
            PolicyKind::FixedWindow => Policy::FixedWindow(build_limits(self.limits)?),
        };

        let config = Config {
            format,
            scope,
            policy,
            cache_size: self.cache.size,
        };
        config.validate()?;
        Ok(config)
    }
}

impl RawLeakyBucket {
    fn build(self) -> std::result::Result<BucketLimits, ConfigError> {
        let capacity = self.capacity.ok_or(ConfigError::MissingField {
            field: "leaky_bucket.capacity",
        })?;
        let leak_rate = self.leak_rate.ok_or(ConfigError::MissingField {
            field: "leaky_bucket.leak_rate",
        })?;

        let mut overrides = BTreeMap::new();
        for o in self.overrides {
            let params = BucketParams {
                capacity: o.capacity,
                leak_rate: o.leak_rate,
            };
            if overrides.insert(o.api_key.clone(), params).is_some() {
                return Err(duplicate("leaky_bucket.overrides", &o.api_key));
            }
        }

        Ok(BucketLimits {
            default: BucketParams {
                capacity,
                leak_rate,
            },
            overrides,
        })
    }
}

fn build_limits(raw: Vec<RawKeyLimits>) -> std::result::Result<WindowLimits, ConfigError> {
    let mut keys = BTreeMap::new();
    for entry in raw {
        let mut endpoints = BTreeMap::new();
        for ep in entry.endpoints {
            let windows = ep.windows.into_iter().map(RawRateLimit::build).collect();
            if endpoints.insert(ep.endpoint.clone(), windows).is_some() {
                return Err(duplicate("limits.endpoints", &ep.endpoint));
            }
        }
        let limits = KeyLimits {
            windows: entry.windows.into_iter().map(RawRateLimit::build).collect(),
            endpoints,
        };
        if keys.insert(entry.api_key.clone(), limits).is_some() {
            return Err(duplicate("limits", &entry.api_key));
        }
    }
    Ok(WindowLimits { keys })
}

impl RawRateLimit {
    const fn build(self) -> RateLimit {
        RateLimit {
            max_events: self.max_events,
            per: self.per,
        }
    }
}

fn duplicate(field: &'static str, name: &str) -> ConfigError {
    ConfigError::InvalidField {
        field,
        message: format!("{name} is listed more than once"),
    }
}

impl Default for RawLog {
    fn default() -> Self {
        Self {
            record_separator: default_record_separator(),
            field_separator: default_field_separator(),
        }
    }
}

impl Default for RawPolicy {
    fn default() -> Self {
        Self {
            kind: default_policy(),
            scope: default_scope(),
        }
    }
}

impl Default for RawCache {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
        }
    }
}
