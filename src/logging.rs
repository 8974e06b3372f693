//! Tracing bootstrap.
//!
//! `RUST_LOG` takes precedence over the configured level. When a log
//! directory is configured, output is mirrored to a daily rolling file; the
//! returned guard must be held for the lifetime of the process so buffered
//! lines are flushed.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingSection};

const LOG_FILE_PREFIX: &str = "aios.log";

/// Build the env filter: `RUST_LOG` wins, then the configured level.
pub fn build_filter(level: &str, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if verbose { "debug" } else { level };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Returns the file writer guard if file
/// logging is enabled.
pub fn init(config: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&config.level, verbose);

    let (file_writer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .with(file_writer.map(|w| fmt::layer().json().with_ansi(false).with_writer(w)))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
            .try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_raises_level_to_debug() {
        // Only meaningful when RUST_LOG is unset in the test environment.
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = build_filter("warn", true);
        assert_eq!(filter.to_string(), "debug");
    }
}
