//! Structured logging init (SPEC_FULL §4.18): rolling file appender, a
//! non-blocking writer, and an env-filter, matching this codebase's existing
//! initialization shape. JSON in production, pretty in development.

use crate::config::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn init_logging(config: &Config) -> WorkerGuard {
    let file_appender = match config.logging.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.logging.log_dir, &config.logging.log_file),
        "daily" => tracing_appender::rolling::daily(&config.logging.log_dir, &config.logging.log_file),
        _ => tracing_appender::rolling::never(&config.logging.log_dir, &config.logging.log_file),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.log_level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json_logging() {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}
