//! Tracing subscriber setup
//!
//! Records go to stderr (text or JSON) and, when a log file is configured, are
//! appended to that file as plain text without colour codes. stdout is
//! reserved for the run summary.
//! `RUST_LOG` overrides the severity from the command line.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing::Subscriber;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};
use crate::report::Severity;
use crate::{Error, Result};

/// Default filter directives for a severity. Client libraries are held at
/// `warn` so request chatter does not drown out per-item records.
pub fn default_directives(level: Severity) -> String {
    format!("{},kube=warn,hyper=warn,tower=warn,rustls=warn", level.as_directive())
}

/// Human-readable layer appending to `path`. Existing content is kept.
fn file_layer<S>(path: &Path) -> Result<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io(format!("open log file {}", path.display()), e))?;
    Ok(tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Arc::new(file)))
}

/// Install the global subscriber. Must be called at most once per process.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

    let (text_layer, json_layer) = match config.format {
        LogFormat::Text => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            ),
        ),
    };

    let log_file = config.file.as_deref().map(file_layer).transpose()?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer)
        .with(log_file)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| Error::telemetry(e.to_string()))?;

    Ok(())
}
