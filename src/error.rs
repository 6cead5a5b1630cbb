use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read request log {path}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render report")]
    Report(#[from] serde_json::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("missing required configuration field: {field}")]
    MissingField { field: &'static str },
    #[error("invalid configuration for {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
    #[error("no rate limit configured for api key {api_key}{}", endpoint_suffix(.endpoint.as_deref()))]
    UnknownKey {
        api_key: String,
        endpoint: Option<String>,
    },
    #[error("configuration error: {0}")]
    Other(String),
}

fn endpoint_suffix(endpoint: Option<&str>) -> String {
    endpoint.map_or_else(String::new, |e| format!(" (endpoint {e})"))
}

/// A single malformed record. Records are skipped, never fatal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("record #{index} skipped: {kind}")]
pub struct RecordError {
    pub index: usize,
    pub record: String,
    pub kind: RecordErrorKind,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecordErrorKind {
    #[error("expected 4 or 6 fields, found {found}")]
    FieldCount { found: usize },
    #[error("empty {field}")]
    EmptyField { field: &'static str },
    #[error("invalid timestamp {value:?}")]
    Timestamp { value: String },
    #[error("invalid size {value:?}")]
    Size { value: String },
    #[error("size must be a positive finite number, got {value}")]
    NonPositiveSize { value: String },
}

impl Error {
    /// Whether this error came from configuration rather than input or I/O.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, Error, RecordError, RecordErrorKind};

    #[test]
    fn unknown_key_mentions_endpoint_when_present() {
        let bare = ConfigError::UnknownKey {
            api_key: "sk_1".to_string(),
            endpoint: None,
        };
        assert_eq!(bare.to_string(), "no rate limit configured for api key sk_1");

        let scoped = ConfigError::UnknownKey {
            api_key: "sk_1".to_string(),
            endpoint: Some("/v1/charges".to_string()),
        };
        assert_eq!(
            scoped.to_string(),
            "no rate limit configured for api key sk_1 (endpoint /v1/charges)"
        );
        assert!(Error::from(scoped).is_config());
    }

    #[test]
    fn record_error_renders_index_and_reason() {
        let err = RecordError {
            index: 3,
            record: "garbage".to_string(),
            kind: RecordErrorKind::FieldCount { found: 1 },
        };
        assert_eq!(
            err.to_string(),
            "record #3 skipped: expected 4 or 6 fields, found 1"
        );
    }
}
