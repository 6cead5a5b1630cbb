//! Aggregations over a replay: per-key summary, per-minute histogram,
//! trailing-window counts and rate-limit headers.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::time::Duration;

use chrono::{DateTime, Utc};
use humantime::format_duration;
use serde::Serialize;

use crate::engine::{Decision, Ledger};
use crate::error::RecordError;
use crate::limiter::Quota;
use crate::parser::ParsedLog;
use crate::types::{Outcome, PolicyKind, Request};

const MINUTE_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Trailing window of [`Report::recent_requests`].
pub const RECENT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct KeySummary {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl KeySummary {
    fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Accepted => self.accepted += 1,
            Outcome::Rejected => self.rejected += 1,
        }
    }
}

/// Per-key totals, keyed by the displayed [`crate::types::RequestKey`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Summary(BTreeMap<String, KeySummary>);

impl Summary {
    pub fn from_ledger(ledger: &Ledger) -> Self {
        let mut keys: BTreeMap<String, KeySummary> = BTreeMap::new();
        for decision in ledger {
            keys.entry(decision.key.to_string())
                .or_default()
                .record(decision.outcome);
        }
        Self(keys)
    }

    pub fn get(&self, key: &str) -> Option<&KeySummary> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeySummary)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Ledger {
    /// `request_id -> outcome`. A request id seen twice keeps its last decision.
    pub fn outcomes(&self) -> BTreeMap<String, Outcome> {
        self.decisions()
            .iter()
            .map(|d| (d.request_id.clone(), d.outcome))
            .collect()
    }

    pub fn summary(&self) -> Summary {
        Summary::from_ledger(self)
    }
}

/// Requests per api key per calendar minute (`YYYY-MM-DDTHH:MM`, UTC).
pub fn requests_per_minute(requests: &[Request]) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut counts: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for request in requests {
        *counts
            .entry(request.api_key.clone())
            .or_default()
            .entry(request.timestamp.format(MINUTE_FORMAT).to_string())
            .or_default() += 1;
    }
    counts
}

/// Requests per api key with `as_of - window < timestamp <= as_of`.
///
/// Every api key present in `requests` appears in the result, possibly with 0.
pub fn recent_counts(
    requests: &[Request],
    as_of: DateTime<Utc>,
    window: Duration,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for request in requests {
        let slot = counts.entry(request.api_key.clone()).or_insert(0);
        let in_window = (as_of - request.timestamp)
            .to_std()
            .is_ok_and(|age| age < window);
        if in_window {
            *slot += 1;
        }
    }
    counts
}

impl Decision {
    /// Headers a live limiter would attach to the response for this request.
    pub fn rate_limit_headers(&self) -> Vec<(String, String)> {
        match &self.quota {
            Quota::Bucket { level, capacity } => vec![
                ("X-RateLimit-Limit".to_string(), capacity.to_string()),
                (
                    "X-RateLimit-Remaining".to_string(),
                    (capacity - level).max(0.0).floor().to_string(),
                ),
            ],
            Quota::Windows { windows } => {
                let mut headers = Vec::with_capacity(windows.len() + 2);
                if let Some(tightest) = windows.iter().min_by_key(|w| w.remaining) {
                    headers.push(("X-RateLimit-Limit".to_string(), tightest.limit.to_string()));
                    headers.push((
                        "X-RateLimit-Remaining".to_string(),
                        tightest.remaining.to_string(),
                    ));
                }
                for window in windows {
                    headers.push((
                        format!("X-RateLimit-Remaining-{}", window_label(window.per)),
                        window.remaining.to_string(),
                    ));
                }
                headers
            }
        }
    }
}

fn window_label(per: Duration) -> String {
    match per.as_secs() {
        1 => "Second".to_string(),
        60 => "Minute".to_string(),
        3600 => "Hour".to_string(),
        86_400 => "Day".to_string(),
        _ => format_duration(per).to_string(),
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

impl From<&RecordError> for SkippedRecord {
    fn from(err: &RecordError) -> Self {
        Self {
            index: err.index,
            reason: err.kind.to_string(),
        }
    }
}

/// Everything the CLI prints for one run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    pub policy: PolicyKind,
    pub outcomes: BTreeMap<String, Outcome>,
    pub summary: Summary,
    pub requests_per_minute: BTreeMap<String, BTreeMap<String, usize>>,
    /// Requests per api key in the [`RECENT_WINDOW`] ending at the last
    /// request of the log.
    pub recent_requests: BTreeMap<String, usize>,
    /// `request_id -> header -> value`, last decision wins like `outcomes`.
    pub rate_limit_headers: BTreeMap<String, BTreeMap<String, String>>,
    pub skipped: Vec<SkippedRecord>,
}

impl Report {
    pub fn from_run(policy: PolicyKind, parsed: &ParsedLog, ledger: &Ledger) -> Self {
        Self {
            policy,
            outcomes: ledger.outcomes(),
            summary: ledger.summary(),
            requests_per_minute: requests_per_minute(&parsed.requests),
            recent_requests: parsed
                .requests
                .last()
                .map(|last| recent_counts(&parsed.requests, last.timestamp, RECENT_WINDOW))
                .unwrap_or_default(),
            rate_limit_headers: ledger
                .decisions()
                .iter()
                .map(|d| {
                    let headers: BTreeMap<String, String> =
                        d.rate_limit_headers().into_iter().collect();
                    (d.request_id.clone(), headers)
                })
                .collect(),
            skipped: parsed.skipped.iter().map(SkippedRecord::from).collect(),
        }
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "policy: {}", self.policy)?;
        writeln!(f, "{:<40} {:>8} {:>8} {:>8}", "key", "total", "accepted", "rejected")?;
        for (key, s) in self.summary.iter() {
            writeln!(
                f,
                "{key:<40} {:>8} {:>8} {:>8}",
                s.total, s.accepted, s.rejected
            )?;
        }
        writeln!(f)?;
        for (request_id, outcome) in &self.outcomes {
            writeln!(f, "{request_id}: {outcome}")?;
        }
        if !self.recent_requests.is_empty() {
            writeln!(f)?;
            writeln!(f, "last {}:", format_duration(RECENT_WINDOW))?;
            for (api_key, count) in &self.recent_requests {
                writeln!(f, "  {api_key}: {count}")?;
            }
        }
        if !self.skipped.is_empty() {
            writeln!(f)?;
            writeln!(f, "skipped {} malformed record(s):", self.skipped.len())?;
            for skipped in &self.skipped {
                writeln!(f, "  #{}: {}", skipped.index, skipped.reason)?;
            }
        }
        Ok(())
    }
}
