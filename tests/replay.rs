#![allow(clippy::unwrap_used, clippy::expect_used)]

use ratelog::config::{Config, RateLimit, WindowLimits};
use ratelog::error::{ConfigError, Error};
use ratelog::types::{KeyScope, Outcome};
use ratelog::{LogFormat, Pipeline};

const SAMPLE: &str = "2025-01-01T10:00:00Z;key_A;req_1;10~2025-01-01T10:00:00Z;key_A;req_2;15~2025-01-01T10:00:01Z;key_A;req_3;20";

fn pipeline(config: Config) -> Pipeline {
    Pipeline::new(config).expect("valid config")
}

#[test]
fn leaky_bucket_report_matches_sample() {
    let pipeline = pipeline(Config::leaky_bucket(30.0, 10.0));
    let run = pipeline.run(SAMPLE).expect("replay");
    let report = pipeline.report(&run);

    insta::assert_json_snapshot!(report.outcomes, @r#"
    {
      "req_1": "ACCEPTED",
      "req_2": "ACCEPTED",
      "req_3": "REJECTED"
    }
    "#);
    let summary = report.summary.get("key_A").copied().expect("key_A summary");
    assert_eq!((summary.total, summary.accepted, summary.rejected), (3, 2, 1));
    assert_eq!(report.requests_per_minute["key_A"]["2025-01-01T10:00"], 3);
    assert!(report.skipped.is_empty());
}

#[test]
fn unordered_input_is_replayed_by_timestamp() {
    let log = "2025-01-01T10:00:01Z;key_A;req_3;20~2025-01-01T10:00:00Z;key_A;req_1;10~2025-01-01T10:00:00Z;key_A;req_2;15";
    let pipeline = pipeline(Config::leaky_bucket(30.0, 10.0));
    let run = pipeline.run(log).expect("replay");

    let order: Vec<_> = run
        .ledger
        .decisions()
        .iter()
        .map(|d| d.request_id.as_str())
        .collect();
    assert_eq!(order, ["req_1", "req_2", "req_3"]);
    assert_eq!(run.ledger.outcomes()["req_3"], Outcome::Rejected);
}

#[test]
fn malformed_records_are_skipped_not_fatal() {
    let log = "2025-01-01T10:00:00Z;key_A;req_1;10~garbage~2025-01-01T10:00:00Z;key_A;req_2;-3~~2025-01-01T10:00:01Z;key_A;req_3;abc";
    let pipeline = pipeline(Config::leaky_bucket(30.0, 10.0));
    let run = pipeline.run(log).expect("replay");
    let report = pipeline.report(&run);

    assert_eq!(run.ledger.len(), 1);
    let indexes: Vec<_> = report.skipped.iter().map(|s| s.index).collect();
    assert_eq!(indexes, [1, 2, 4]);
}

#[test]
fn sliding_window_enforces_every_window() {
    let limits = WindowLimits::default().with_key(
        "sk_test_123",
        vec![RateLimit::per_minute(2), RateLimit::per_hour(3)],
    );
    let pipeline = pipeline(Config::sliding_window(limits));
    // 00:00:00, 00:00:10, 00:00:20, 00:01:05, 00:02:10
    let log = [
        "1640995200;sk_test_123;a;1",
        "1640995210;sk_test_123;b;1",
        "1640995220;sk_test_123;c;1",
        "1640995265;sk_test_123;d;1",
        "1640995330;sk_test_123;e;1",
    ]
    .join("~");
    let run = pipeline.run(&log).expect("replay");
    let outcomes = run.ledger.outcomes();

    assert_eq!(outcomes["a"], Outcome::Accepted);
    assert_eq!(outcomes["b"], Outcome::Accepted);
    assert_eq!(outcomes["c"], Outcome::Rejected);
    // minute window freed by `a`, hour window now holds 3
    assert_eq!(outcomes["d"], Outcome::Accepted);
    assert_eq!(outcomes["e"], Outcome::Rejected);
}

#[test]
fn unknown_key_is_a_configuration_error() {
    let limits = WindowLimits::default().with_key("known", vec![RateLimit::per_minute(1)]);
    let pipeline = pipeline(Config::fixed_window(limits));
    let err = pipeline
        .run("1640995200;known;a;1~1640995200;other;b;1")
        .expect_err("unknown key");

    assert!(err.is_config());
    assert!(matches!(
        err,
        Error::Config(ConfigError::UnknownKey { ref api_key, endpoint: None }) if api_key == "other"
    ));
}

#[test]
fn custom_separators_and_scope() {
    let format = LogFormat::new('|', ',').expect("format");
    let limits = WindowLimits::default().with_key("k", vec![RateLimit::per_minute(1)]);
    let config = Config::sliding_window(limits)
        .with_format(format)
        .with_scope(KeyScope::ApiKeyEndpoint);
    let pipeline = pipeline(config);
    let log = "1640995200,k,a,1,/x,1.1.1.1|1640995201,k,b,1,/y,1.1.1.1|1640995202,k,c,1,/x,2.2.2.2";
    let run = pipeline.run(log).expect("replay");
    let report = pipeline.report(&run);

    assert_eq!(report.outcomes["a"], Outcome::Accepted);
    assert_eq!(report.outcomes["b"], Outcome::Accepted);
    assert_eq!(report.outcomes["c"], Outcome::Rejected);
    assert_eq!(report.summary.len(), 2);
    assert!(report.summary.get("k:/x").is_some());
}

#[test]
fn text_report_lists_keys_and_skips() {
    let pipeline = pipeline(Config::leaky_bucket(30.0, 10.0));
    let run = pipeline.run(&format!("{SAMPLE}~bad")).expect("replay");
    let text = pipeline.report(&run).to_string();

    assert!(text.starts_with("policy: leaky-bucket\n"));
    assert!(text.contains("req_3: REJECTED"));
    assert!(text.contains("skipped 1 malformed record(s):"));
}

#[test]
fn replay_is_idempotent() {
    let pipeline = pipeline(Config::leaky_bucket(30.0, 10.0));
    let first = pipeline.run(SAMPLE).expect("first");
    let second = pipeline.run(SAMPLE).expect("second");
    assert_eq!(first, second);
}

#[test]
fn json_report_includes_recent_counts_and_headers() {
    let pipeline = pipeline(Config::leaky_bucket(30.0, 10.0));
    let run = pipeline.run(SAMPLE).expect("replay");
    let json = serde_json::to_value(pipeline.report(&run)).expect("serialise report");

    assert_eq!(json["recent_requests"]["key_A"], 3);
    assert_eq!(json["rate_limit_headers"]["req_3"]["X-RateLimit-Limit"], "30");
    assert_eq!(json["rate_limit_headers"]["req_3"]["X-RateLimit-Remaining"], "15");
}

#[test]
fn configured_cache_size_is_used_across_inputs() {
    let config = Config {
        cache_size: 1,
        ..Config::leaky_bucket(30.0, 10.0)
    };
    let pipeline = pipeline(config);
    let mut cache = pipeline.cache();
    let other = "2025-01-01T11:00:00Z;key_B;req_9;1";

    pipeline.run_cached(&mut cache, SAMPLE).expect("first");
    pipeline.run_cached(&mut cache, SAMPLE).expect("repeat");
    pipeline.run_cached(&mut cache, other).expect("other");
    pipeline.run_cached(&mut cache, SAMPLE).expect("evicted");

    assert_eq!((cache.hits(), cache.misses()), (1, 3));
    assert_eq!(cache.len(), 1);
}
