//! Replays parsed requests through the configured admission policy.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::{Config, Policy, RateLimit, WindowLimits};
use crate::error::ConfigError;
use crate::limiter::{FixedWindow, KeyedStates, LeakyBucket, Limiter, Quota, SlidingWindow};
use crate::types::{KeyScope, Outcome, Request, RequestKey};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Decision {
    pub seq: usize,
    pub request_id: String,
    pub key: RequestKey,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub quota: Quota,
}

/// Decisions in processing order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Ledger {
    decisions: Vec<Decision>,
}

impl Ledger {
    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn accepted(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.outcome.is_accepted())
            .count()
    }

    fn push(&mut self, decision: Decision) {
        self.decisions.push(decision);
    }
}

impl<'a> IntoIterator for &'a Ledger {
    type Item = &'a Decision;
    type IntoIter = std::slice::Iter<'a, Decision>;

    fn into_iter(self) -> Self::IntoIter {
        self.decisions.iter()
    }
}

pub struct Engine<'a> {
    config: &'a Config,
}

impl<'a> Engine<'a> {
    pub const fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Run every request through a fresh set of per-key states.
    ///
    /// `requests` must already be in processing order (see
    /// [`crate::parser::parse_log`]).
    ///
    /// # Errors
    ///
    /// Window policies return [`ConfigError::UnknownKey`] for a request whose
    /// api key has no limits. The check runs before any state is touched.
    pub fn replay(&self, requests: &[Request]) -> Result<Ledger, ConfigError> {
        let scope = self.config.scope;
        match &self.config.policy {
            Policy::LeakyBucket(limits) => {
                let mut states = KeyedStates::<LeakyBucket>::default();
                run(requests, scope, &mut states, |r| {
                    Ok(limits.params_for(&r.api_key))
                })
            }
            Policy::SlidingWindow(limits) => {
                check_known(limits, requests)?;
                let mut states = KeyedStates::<SlidingWindow>::default();
                run(requests, scope, &mut states, |r| resolve(limits, r))
            }
            Policy::FixedWindow(limits) => {
                check_known(limits, requests)?;
                let mut states = KeyedStates::<FixedWindow>::default();
                run(requests, scope, &mut states, |r| resolve(limits, r))
            }
        }
    }
}

fn resolve<'l>(limits: &'l WindowLimits, request: &Request) -> Result<&'l [RateLimit], ConfigError> {
    limits.resolve(&request.api_key, request.endpoint.as_deref())
}

fn check_known(limits: &WindowLimits, requests: &[Request]) -> Result<(), ConfigError> {
    for request in requests {
        resolve(limits, request)?;
    }
    Ok(())
}

fn run<'p, S, F>(
    requests: &[Request],
    scope: KeyScope,
    states: &mut KeyedStates<S>,
    params_for: F,
) -> Result<Ledger, ConfigError>
where
    S: Limiter,
    S::Params: 'p,
    F: Fn(&Request) -> Result<&'p S::Params, ConfigError>,
{
    let mut ledger = Ledger::default();
    for request in requests {
        let key = scope.key_for(request);
        let params = params_for(request)?;
        let (outcome, quota) = states.entry(&key).admit(request.timestamp, request.weight, params);

        if outcome.is_accepted() {
            trace!(%key, request_id = %request.request_id, "accepted");
        } else {
            debug!(%key, request_id = %request.request_id, "rejected by rate limit");
        }

        ledger.push(Decision {
            seq: request.seq,
            request_id: request.request_id.clone(),
            key,
            timestamp: request.timestamp,
            outcome,
            quota,
        });
    }
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::Engine;
    use crate::config::{Config, RateLimit, WindowLimits};
    use crate::error::ConfigError;
    use crate::limiter::Quota;
    use crate::parser::{LogFormat, parse_log};
    use crate::types::{KeyScope, Outcome};

    const SAMPLE: &str = "2025-01-01T10:00:00Z;key_A;req_1;10~2025-01-01T10:00:00Z;key_A;req_2;15~2025-01-01T10:00:01Z;key_A;req_3;20";

    #[test]
    fn leaky_bucket_replays_sample_log() {
        let config = Config::leaky_bucket(30.0, 10.0);
        let parsed = parse_log(SAMPLE, &LogFormat::default());
        let ledger = Engine::new(&config).replay(&parsed.requests);
        let ledger = match ledger {
            Ok(ledger) => ledger,
            Err(err) => panic!("replay failed: {err}"),
        };

        let outcomes: Vec<_> = ledger.decisions().iter().map(|d| d.outcome).collect();
        assert_eq!(
            outcomes,
            [Outcome::Accepted, Outcome::Accepted, Outcome::Rejected]
        );
        let levels: Vec<_> = ledger
            .decisions()
            .iter()
            .map(|d| match d.quota {
                Quota::Bucket { level, .. } => level,
                Quota::Windows { .. } => f64::NAN,
            })
            .collect();
        assert_eq!(levels, [10.0, 25.0, 15.0]);
        assert_eq!(ledger.accepted(), 2);
    }

    #[test]
    fn keys_do_not_share_buckets() {
        let config = Config::leaky_bucket(10.0, 0.0);
        let log = "2025-01-01T10:00:00Z;a;r1;10~2025-01-01T10:00:00Z;b;r2;10~2025-01-01T10:00:01Z;a;r3;1";
        let parsed = parse_log(log, &LogFormat::default());
        let ledger = Engine::new(&config).replay(&parsed.requests).unwrap_or_default();
        let outcomes: Vec<_> = ledger.decisions().iter().map(|d| d.outcome).collect();
        assert_eq!(
            outcomes,
            [Outcome::Accepted, Outcome::Accepted, Outcome::Rejected]
        );
    }

    #[test]
    fn unknown_key_aborts_before_any_decision() {
        let limits = WindowLimits::default().with_key("known", vec![RateLimit::per_minute(5)]);
        let config = Config::sliding_window(limits);
        let log = "1640995200;known;r1;1~1640995201;stranger;r2;1";
        let parsed = parse_log(log, &LogFormat::default());
        let err = Engine::new(&config).replay(&parsed.requests);
        assert!(matches!(
            err,
            Err(ConfigError::UnknownKey { ref api_key, .. }) if api_key == "stranger"
        ));
    }

    #[test]
    fn sliding_window_uses_composite_keys_and_endpoint_limits() {
        let limits = WindowLimits::default()
            .with_key("sk", vec![RateLimit::per_minute(2)])
            .with_endpoint("sk", "/v1/refunds", vec![RateLimit::per_minute(1)]);
        let config = Config::sliding_window(limits).with_scope(KeyScope::ApiKeyEndpointIp);
        let log = [
            "1640995200;sk;c1;1;/v1/charges;10.0.0.1",
            "1640995201;sk;c2;1;/v1/charges;10.0.0.1",
            "1640995202;sk;c3;1;/v1/charges;10.0.0.1",
            "1640995203;sk;c4;1;/v1/charges;10.0.0.2",
            "1640995204;sk;f1;1;/v1/refunds;10.0.0.1",
            "1640995205;sk;f2;1;/v1/refunds;10.0.0.1",
        ]
        .join("~");
        let parsed = parse_log(&log, &LogFormat::default());
        let ledger = Engine::new(&config).replay(&parsed.requests).unwrap_or_default();
        let outcomes: Vec<_> = ledger
            .decisions()
            .iter()
            .map(|d| (d.request_id.as_str(), d.outcome))
            .collect();
        assert_eq!(
            outcomes,
            [
                ("c1", Outcome::Accepted),
                ("c2", Outcome::Accepted),
                ("c3", Outcome::Rejected),
                ("c4", Outcome::Accepted),
                ("f1", Outcome::Accepted),
                ("f2", Outcome::Rejected),
            ]
        );
        assert_eq!(
            ledger.decisions()[3].key.to_string(),
            "sk:/v1/charges:10.0.0.2"
        );
    }

    #[test]
    fn fixed_window_counts_per_calendar_minute() {
        let limits = WindowLimits::default().with_key("sk", vec![RateLimit::per_minute(1)]);
        let config = Config::fixed_window(limits);
        // 1640995200 is 2022-01-01T00:00:00Z
        let log = "1640995259;sk;a;1~1640995259;sk;b;1~1640995260;sk;c;1";
        let parsed = parse_log(log, &LogFormat::default());
        let ledger = Engine::new(&config).replay(&parsed.requests).unwrap_or_default();
        let outcomes: Vec<_> = ledger.decisions().iter().map(|d| d.outcome).collect();
        assert_eq!(
            outcomes,
            [Outcome::Accepted, Outcome::Rejected, Outcome::Accepted]
        );
    }

    #[test]
    fn empty_input_yields_empty_ledger() {
        let config = Config::leaky_bucket(1.0, 1.0);
        let ledger = Engine::new(&config).replay(&[]).unwrap_or_default();
        assert!(ledger.is_empty());
    }
}
