use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Accepted,
    Rejected,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
        }
    }

    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    LeakyBucket,
    SlidingWindow,
    FixedWindow,
}

impl PolicyKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LeakyBucket => "leaky-bucket",
            Self::SlidingWindow => "sliding-window",
            Self::FixedWindow => "fixed-window",
        }
    }
}

impl Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "leaky-bucket" | "leaky" => Ok(Self::LeakyBucket),
            "sliding-window" | "sliding" => Ok(Self::SlidingWindow),
            "fixed-window" | "fixed" => Ok(Self::FixedWindow),
            other => Err(format!("unknown policy: {other}")),
        }
    }
}

/// Which request fields make up the rate-limited identity.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyScope {
    #[default]
    ApiKey,
    ApiKeyEndpoint,
    ApiKeyEndpointIp,
}

impl KeyScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api-key",
            Self::ApiKeyEndpoint => "api-key-endpoint",
            Self::ApiKeyEndpointIp => "api-key-endpoint-ip",
        }
    }

    pub const fn includes_endpoint(self) -> bool {
        !matches!(self, Self::ApiKey)
    }

    pub fn key_for(self, request: &Request) -> RequestKey {
        let (endpoint, ip) = match self {
            Self::ApiKey => (None, None),
            Self::ApiKeyEndpoint => (Some(request.endpoint_or_default()), None),
            Self::ApiKeyEndpointIp => (
                Some(request.endpoint_or_default()),
                Some(request.ip.clone().unwrap_or_default()),
            ),
        };
        RequestKey {
            api_key: request.api_key.clone(),
            endpoint,
            ip,
        }
    }
}

impl Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "api-key" | "key" => Ok(Self::ApiKey),
            "api-key-endpoint" | "endpoint" => Ok(Self::ApiKeyEndpoint),
            "api-key-endpoint-ip" | "endpoint-ip" => Ok(Self::ApiKeyEndpointIp),
            other => Err(format!("unknown key scope: {other}")),
        }
    }
}

/// One parsed log record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Request {
    /// Position of the record in the raw input, used as the ordering tie-break.
    pub seq: usize,
    pub timestamp: DateTime<Utc>,
    pub api_key: String,
    pub request_id: String,
    pub weight: f64,
    pub endpoint: Option<String>,
    pub ip: Option<String>,
}

impl Request {
    fn endpoint_or_default(&self) -> String {
        self.endpoint.clone().unwrap_or_default()
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct RequestKey {
    pub api_key: String,
    pub endpoint: Option<String>,
    pub ip: Option<String>,
}

impl RequestKey {
    pub fn api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: None,
            ip: None,
        }
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_key)?;
        if let Some(endpoint) = &self.endpoint {
            write!(f, ":{endpoint}")?;
        }
        if let Some(ip) = &self.ip {
            write!(f, ":{ip}")?;
        }
        Ok(())
    }
}
