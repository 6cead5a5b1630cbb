#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use engine::{Decision, Engine, Ledger};
pub use parser::{LogFormat, ParsedLog, parse_log};
pub use pipeline::{Pipeline, Run};
pub use report::Report;
pub use types::{Outcome, Request, RequestKey};

pub type Result<T> = std::result::Result<T, error::Error>;
