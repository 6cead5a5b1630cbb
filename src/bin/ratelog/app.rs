use std::io::Read;
use std::path::{Path, PathBuf};

use ratelog::Result;
use ratelog::config::Config;
use ratelog::error::Error;
use ratelog::pipeline::Pipeline;
use ratelog::report::Report;
use ratelog::telemetry::init_tracing;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cli::{Cli, OutputFormat};

const DEFAULT_CONFIG: &str = "ratelog.toml";
const STDIN_MARKER: &str = "-";

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.log_filter.as_deref(), cli.json_logs)?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = Config::load(&config_path, &cli.overrides())?;
    info!(
        policy = %config.policy_kind(),
        scope = %config.scope,
        cache_size = config.cache_size,
        config = %config_path.display(),
        "configuration loaded"
    );

    let pipeline = Pipeline::new(config)?;
    let mut cache = pipeline.cache();
    let mut reports = Vec::new();
    for path in input_paths(&cli.inputs) {
        let input = read_input(Some(path.as_path()))?;
        let run = pipeline.run_cached(&mut cache, &input)?;
        if !run.parsed.skipped.is_empty() {
            warn!(
                input = %path.display(),
                skipped = run.parsed.skipped.len(),
                "malformed records were skipped"
            );
        }
        reports.push(InputReport {
            input: path.display().to_string(),
            report: pipeline.report(&run),
        });
    }
    debug!(
        hits = cache.hits(),
        misses = cache.misses(),
        "replay cache statistics"
    );

    print_reports(&reports, cli.format)
}

#[derive(Debug, Serialize)]
struct InputReport {
    input: String,
    #[serde(flatten)]
    report: Report,
}

fn input_paths(inputs: &[PathBuf]) -> Vec<PathBuf> {
    if inputs.is_empty() {
        vec![PathBuf::from(STDIN_MARKER)]
    } else {
        inputs.to_vec()
    }
}

fn print_reports(reports: &[InputReport], format: OutputFormat) -> Result<()> {
    match (format, reports) {
        (OutputFormat::Json, [single]) => {
            println!("{}", serde_json::to_string_pretty(&single.report)?);
        }
        (OutputFormat::Json, many) => println!("{}", serde_json::to_string_pretty(many)?),
        (OutputFormat::Text, [single]) => print!("{}", single.report),
        (OutputFormat::Text, many) => {
            for entry in many {
                println!("== {} ==", entry.input);
                print!("{}", entry.report);
                println!();
            }
        }
    }
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path.as_os_str() != STDIN_MARKER => {
            std::fs::read_to_string(path).map_err(|source| Error::Input {
                path: path.to_path_buf(),
                source,
            })
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|source| Error::Input {
                    path: PathBuf::from(STDIN_MARKER),
                    source,
                })?;
            Ok(buf)
        }
    }
}
