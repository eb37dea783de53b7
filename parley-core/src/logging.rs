//! Process-wide `tracing` subscriber

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Dependencies that get noisy below these levels
const QUIET_TARGETS: [(&str, Level); 3] = [
    ("sqlx", Level::WARN),
    ("tungstenite", Level::INFO),
    ("hyper", Level::INFO),
];

/// Install the global subscriber.
///
/// `RUST_LOG` replaces the generated filter when set. With `file_path` the
/// output is appended to that file without ANSI colors, otherwise it goes
/// to stdout.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))?;

    let (writer, ansi) = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_writer(writer),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(ansi)
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(false)
                    .with_writer(writer),
            )
            .try_init()?;
    }

    Ok(())
}

/// Filter directives for `level`, with noisy dependencies capped
fn default_directives(level: Level) -> String {
    let mut directives = vec![level.as_str().to_lowercase()];
    for (target, cap) in QUIET_TARGETS {
        // in tracing, a more verbose level compares greater
        if level > cap {
            directives.push(format!("{target}={}", cap.as_str().to_lowercase()));
        }
    }
    directives.join(",")
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
