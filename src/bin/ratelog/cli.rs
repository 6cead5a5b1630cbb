use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use ratelog::config::Overrides;
use ratelog::types::{KeyScope, PolicyKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a request log through a per-key rate limiter", long_about = None)]
pub struct Cli {
    /// Request logs to replay, in order; `-` or nothing reads stdin.
    #[arg(value_name = "INPUT")]
    pub inputs: Vec<PathBuf>,

    /// Path to the TOML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Admission policy (leaky-bucket, sliding-window, fixed-window).
    #[arg(long, value_parser = clap::value_parser!(PolicyKind))]
    pub policy: Option<PolicyKind>,

    /// Fields identifying a rate-limited key (api-key, api-key-endpoint, api-key-endpoint-ip).
    #[arg(long, value_parser = clap::value_parser!(KeyScope))]
    pub scope: Option<KeyScope>,

    /// Leaky bucket capacity.
    #[arg(long)]
    pub capacity: Option<f64>,

    /// Leaky bucket drain per second.
    #[arg(long)]
    pub leak_rate: Option<f64>,

    /// Character between records.
    #[arg(long)]
    pub record_separator: Option<char>,

    /// Character between fields of a record.
    #[arg(long)]
    pub field_separator: Option<char>,

    /// Output format of the report.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Use a JSON layer for logs (`--features json-logs`).
    #[arg(long, action = ArgAction::SetTrue)]
    pub json_logs: bool,

    /// Explicit log filter (e.g. "ratelog=debug").
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub const fn overrides(&self) -> Overrides {
        Overrides {
            policy: self.policy,
            scope: self.scope,
            capacity: self.capacity,
            leak_rate: self.leak_rate,
            record_separator: self.record_separator,
            field_separator: self.field_separator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, OutputFormat};
    use clap::Parser;
    use ratelog::types::PolicyKind;

    #[test]
    fn parses_policy_overrides() {
        let cli = Cli::try_parse_from([
            "ratelog",
            "requests.log",
            "-",
            "--policy",
            "sliding-window",
            "--capacity",
            "30",
            "--field-separator",
            ",",
            "--format",
            "text",
        ]);
        let Ok(cli) = cli else {
            panic!("arguments rejected");
        };
        assert_eq!(cli.policy, Some(PolicyKind::SlidingWindow));
        assert_eq!(cli.format, OutputFormat::Text);
        assert_eq!(cli.inputs.len(), 2);
        let overrides = cli.overrides();
        assert_eq!(overrides.capacity, Some(30.0));
        assert_eq!(overrides.field_separator, Some(','));
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(Cli::try_parse_from(["ratelog", "--policy", "token-bucket"]).is_err());
    }
}
