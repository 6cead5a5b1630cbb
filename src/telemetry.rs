use tracing_subscriber::{EnvFilter, Layer, Registry, layer::Layered, layer::SubscriberExt};

use crate::Result;
use crate::error::Error;

/// Directive used when neither `--log-filter` nor `RUST_LOG` parses.
pub const DEFAULT_FILTER: &str = "ratelog=info";

/// Install the global subscriber. Logs go to stderr so stdout carries only
/// the report.
///
/// # Errors
///
/// Returns an error if JSON output is requested from a build without the
/// `json-logs` feature, or if a global subscriber is already installed.
pub fn init_tracing(explicit_filter: Option<&str>, use_json: bool) -> Result<()> {
    let env = std::env::var("RUST_LOG").ok();
    let filter = resolve_filter(explicit_filter, env.as_deref())?;
    let subscriber = Registry::default().with(filter).with(fmt_layer(use_json)?);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| Error::Telemetry(err.to_string()))
}

/// First candidate that parses: `explicit`, then `env`, then [`DEFAULT_FILTER`].
pub(crate) fn resolve_filter(explicit: Option<&str>, env: Option<&str>) -> Result<EnvFilter> {
    explicit
        .into_iter()
        .chain(env)
        .chain(std::iter::once(DEFAULT_FILTER))
        .find_map(|candidate| EnvFilter::try_new(candidate).ok())
        .ok_or_else(|| Error::Telemetry("invalid log filter".to_string()))
}

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

fn fmt_layer(use_json: bool) -> Result<BoxedLayer> {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    if !use_json {
        return Ok(layer.compact().boxed());
    }

    #[cfg(feature = "json-logs")]
    {
        Ok(layer.json().flatten_event(true).boxed())
    }

    #[cfg(not(feature = "json-logs"))]
    {
        Err(Error::Telemetry(
            "binary was built without the `json-logs` feature".to_string(),
        ))
    }
}
