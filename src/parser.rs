//! Splits a delimited request log into ordered [`Request`] records.
//!
//! A record is `timestamp;api_key;request_id;size`, optionally followed by
//! `;endpoint;ip`. Records are separated by `~` unless configured otherwise.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{ConfigError, RecordError, RecordErrorKind};
use crate::types::Request;

pub const DEFAULT_RECORD_SEPARATOR: char = '~';
pub const DEFAULT_FIELD_SEPARATOR: char = ';';

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct LogFormat {
    pub record_separator: char,
    pub field_separator: char,
}

impl LogFormat {
    /// Build a format, rejecting separators that would make records ambiguous.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when both separators are equal or
    /// when either one is whitespace.
    pub fn new(record_separator: char, field_separator: char) -> Result<Self, ConfigError> {
        if record_separator == field_separator {
            return Err(ConfigError::InvalidField {
                field: "log.field_separator",
                message: format!("must differ from the record separator {record_separator:?}"),
            });
        }
        for (field, sep) in [
            ("log.record_separator", record_separator),
            ("log.field_separator", field_separator),
        ] {
            if sep.is_whitespace() {
                return Err(ConfigError::InvalidField {
                    field,
                    message: "separator cannot be whitespace".to_string(),
                });
            }
        }
        Ok(Self {
            record_separator,
            field_separator,
        })
    }
}

impl Default for LogFormat {
    fn default() -> Self {
        Self {
            record_separator: DEFAULT_RECORD_SEPARATOR,
            field_separator: DEFAULT_FIELD_SEPARATOR,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedLog {
    /// Well-formed records, ascending by timestamp; ties keep input order.
    pub requests: Vec<Request>,
    pub skipped: Vec<RecordError>,
}

/// Parse every record of `input`, skipping malformed ones.
pub fn parse_log(input: &str, format: &LogFormat) -> ParsedLog {
    let mut parsed = ParsedLog::default();

    for (index, raw) in input.split(format.record_separator).enumerate() {
        let record = raw.trim();
        if record.is_empty() {
            continue;
        }
        match parse_record(index, record, format.field_separator) {
            Ok(request) => parsed.requests.push(request),
            Err(kind) => {
                debug!(index, reason = %kind, "skipping malformed record");
                parsed.skipped.push(RecordError {
                    index,
                    record: record.to_string(),
                    kind,
                });
            }
        }
    }

    // stable: equal timestamps stay in input order
    parsed.requests.sort_by_key(|r| r.timestamp);
    parsed
}

fn parse_record(seq: usize, record: &str, sep: char) -> Result<Request, RecordErrorKind> {
    let fields: Vec<&str> = record.split(sep).map(str::trim).collect();
    let (timestamp, api_key, request_id, size, endpoint, ip) = match fields.as_slice() {
        [ts, key, id, size] => (*ts, *key, *id, *size, None, None),
        [ts, key, id, size, endpoint, ip] => (*ts, *key, *id, *size, Some(*endpoint), Some(*ip)),
        other => return Err(RecordErrorKind::FieldCount { found: other.len() }),
    };

    if api_key.is_empty() {
        return Err(RecordErrorKind::EmptyField { field: "api_key" });
    }
    if request_id.is_empty() {
        return Err(RecordErrorKind::EmptyField {
            field: "request_id",
        });
    }

    Ok(Request {
        seq,
        timestamp: parse_timestamp(timestamp)?,
        api_key: api_key.to_string(),
        request_id: request_id.to_string(),
        weight: parse_size(size)?,
        endpoint: endpoint.filter(|e| !e.is_empty()).map(str::to_string),
        ip: ip.filter(|i| !i.is_empty()).map(str::to_string),
    })
}

/// Accepts RFC 3339 (`2025-01-01T10:00:00Z`) or integer Unix seconds.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RecordErrorKind> {
    let invalid = || RecordErrorKind::Timestamp {
        value: value.to_string(),
    };
    if let Ok(secs) = value.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single().ok_or_else(invalid);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| invalid())
}

fn parse_size(value: &str) -> Result<f64, RecordErrorKind> {
    let size: f64 = value.parse().map_err(|_| RecordErrorKind::Size {
        value: value.to_string(),
    })?;
    if !size.is_finite() || size <= 0.0 {
        return Err(RecordErrorKind::NonPositiveSize {
            value: value.to_string(),
        });
    }
    Ok(size)
}
