//! Logging setup for CLI commands and the background worker

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use vaultindex::{config::LoggingConfig, dirs::default_log_dir};

const LOG_FILE: &str = "vaultindex.log";

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
  // RUST_LOG overrides the configured level
  EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.level).into())
    .from_env_lossy()
}

fn init_stderr(config: &LoggingConfig) {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter(config))
    .with_target(true)
    .with_writer(std::io::stderr)
    .init();
}

/// Initialize logging.
///
/// In the foreground logs go to stderr so stdout carries only results. In
/// background mode they go to a rolling file under the data directory.
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_logging(config: &LoggingConfig, background: bool) -> Option<WorkerGuard> {
  if !background {
    init_stderr(config);
    return None;
  }

  let log_dir = default_log_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    // Fall back to stderr
    init_stderr(config);
    return None;
  }

  let file_appender = match config.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(&log_dir, LOG_FILE),
    "never" => tracing_appender::rolling::never(&log_dir, LOG_FILE),
    _ => tracing_appender::rolling::daily(&log_dir, LOG_FILE),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter(config))
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
