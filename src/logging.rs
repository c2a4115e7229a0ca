//! Tracing setup
//!
//! Every log line lands in a rolling file under `log.dir`; stdout mirrors
//! it for interactive runs. JSON mode switches both sinks to structured
//! output for log shippers.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LogConfig;

/// Initialize the tracing stack.
///
/// The returned guard flushes the file writer on drop; hold it for the
/// process lifetime or shutdown loses buffered lines.
pub fn init_logging(config: &LogConfig) -> WorkerGuard {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config));

    let registry = tracing_subscriber::registry().with(default_filter(&config.level));

    if config.json {
        registry
            .with(fmt::layer().json().with_writer(file_writer).with_ansi(false))
            .with(fmt::layer().json().with_ansi(false))
            .init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(file_writer);
        let stdout_layer = fmt::layer().with_target(false);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

/// `RUST_LOG` wins outright; otherwise the configured level applies to this
/// crate while chatty dependencies (connection pools, hyper) stay at warn.
fn default_filter(level: &str) -> EnvFilter {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return from_env;
    }
    let directives = format!("{level},sqlx=warn,hyper=warn,flashline={level}");
    EnvFilter::new(directives)
}

fn file_appender(config: &LogConfig) -> RollingFileAppender {
    match config.rotation.as_str() {
        "never" => rolling::never(&config.dir, &config.file),
        "hourly" => rolling::hourly(&config.dir, &config.file),
        // Anything else, including the default, rolls daily
        _ => rolling::daily(&config.dir, &config.file),
    }
}
