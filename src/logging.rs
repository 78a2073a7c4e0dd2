//! Logging initialization.
//!
//! Sets up a `tracing` subscriber from the `logging` settings section. Output
//! goes through a non-blocking writer to stdout, stderr or a file.

use crate::config::{LogFormat, LoggingConfig};
use std::fs::OpenOptions;
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global subscriber.
///
/// Returns a guard that must be kept alive for the duration of the program
/// so buffered log lines are flushed.
///
/// * `level_override` - level from the command line, wins over the config
/// * `trace_deps` - also apply the level to dependencies instead of capping
///   them at `warn`
pub fn init_logging(
    config: &LoggingConfig,
    level_override: Option<&str>,
    trace_deps: bool,
) -> io::Result<WorkerGuard> {
    let level = level_override.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level, trace_deps)));

    let (writer, guard) = make_writer(&config.output)?;

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(config.include_target),
            )
            .init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(writer)
                    .with_target(config.include_target),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(writer)
                    .with_target(config.include_target),
            )
            .init(),
    }

    Ok(guard)
}

/// Filter directive for `level`. Unless `trace_deps` is set, only this
/// crate logs below `warn`.
pub fn filter_directive(level: &str, trace_deps: bool) -> String {
    let level = parse_level(level).as_str().to_lowercase();
    if trace_deps {
        level
    } else {
        format!("warn,host_override={}", level)
    }
}

fn make_writer(output: &str) -> io::Result<(NonBlocking, WorkerGuard)> {
    Ok(match output.to_lowercase().as_str() {
        "stdout" => tracing_appender::non_blocking(io::stdout()),
        "stderr" => tracing_appender::non_blocking(io::stderr()),
        _ => {
            let file = OpenOptions::new().create(true).append(true).open(output)?;
            tracing_appender::non_blocking(file)
        }
    })
}

/// Parses a log level string to a tracing Level, defaulting to info.
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("Info"), Level::INFO);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("invalid"), Level::INFO);
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive("debug", false), "warn,host_override=debug");
        assert_eq!(filter_directive("TRACE", true), "trace");
        assert_eq!(filter_directive("bogus", false), "warn,host_override=info");
    }
}
