use tracing::{debug, info};

use crate::Result;
use crate::cache::{ReplayCache, fingerprint};
use crate::config::Config;
use crate::engine::{Engine, Ledger};
use crate::parser::{ParsedLog, parse_log};
use crate::report::Report;

/// Parse, order and replay a request log under one validated [`Config`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub parsed: ParsedLog,
    pub ledger: Ledger,
}

impl Pipeline {
    /// # Errors
    ///
    /// Returns an error when `config` fails [`Config::validate`].
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// # Errors
    ///
    /// Returns [`crate::error::ConfigError::UnknownKey`] when a window policy
    /// meets an api key without limits.
    pub fn run(&self, input: &str) -> Result<Run> {
        let parsed = parse_log(input, &self.config.format);
        let ledger = Engine::new(&self.config).replay(&parsed.requests)?;
        log_run(&parsed, &ledger);
        Ok(Run { parsed, ledger })
    }

    /// Empty cache sized by the configured `cache_size`.
    pub fn cache(&self) -> ReplayCache {
        ReplayCache::for_config(&self.config)
    }

    /// Like [`Pipeline::run`], reusing a ledger from `cache` when the same
    /// input was already replayed under the same configuration.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::run`].
    pub fn run_cached(&self, cache: &mut ReplayCache, input: &str) -> Result<Run> {
        let parsed = parse_log(input, &self.config.format);
        let key = fingerprint(input, &self.config);

        if let Some(ledger) = cache.get(&key) {
            debug!(fingerprint = %key, "replay cache hit");
            return Ok(Run {
                parsed,
                ledger: ledger.clone(),
            });
        }

        let ledger = Engine::new(&self.config).replay(&parsed.requests)?;
        log_run(&parsed, &ledger);
        cache.insert(key, ledger.clone());
        Ok(Run { parsed, ledger })
    }

    pub fn report(&self, run: &Run) -> Report {
        Report::from_run(self.config.policy_kind(), &run.parsed, &run.ledger)
    }
}

fn log_run(parsed: &ParsedLog, ledger: &Ledger) {
    info!(
        requests = parsed.requests.len(),
        skipped = parsed.skipped.len(),
        accepted = ledger.accepted(),
        rejected = ledger.len() - ledger.accepted(),
        "replay complete"
    );
}
