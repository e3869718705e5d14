//! Structured logging setup: console plus an optional rolling file layer.

use tracing_subscriber::{fmt::time::UtcTime, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize tracing from config. Level precedence: config level, then
/// `RUST_LOG`, then `info`. Safe to call more than once; later calls lose.
pub fn init_with_config(cfg: &LoggingConfig) {
    let env_filter = match cfg.level {
        Some(level) => tracing_subscriber::EnvFilter::new(level.as_str()),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };

    let file_writer = if cfg.enable_file_logging {
        build_file_writer(cfg)
    } else {
        None
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.format {
        LogFormat::Json => {
            let console = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stdout);
            let file = file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(writer)
            });
            let _ = registry.with(console).with(file).try_init();
        }
        LogFormat::Text => {
            let console = tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stdout);
            let file = file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(writer)
            });
            let _ = registry.with(console).with(file).try_init();
        }
    }
}

fn build_file_writer(cfg: &LoggingConfig) -> Option<tracing_appender::non_blocking::NonBlocking> {
    let rotation = match cfg.rotation.to_lowercase().as_str() {
        "hourly" => tracing_appender::rolling::Rotation::HOURLY,
        "never" => tracing_appender::rolling::Rotation::NEVER,
        _ => tracing_appender::rolling::Rotation::DAILY,
    };

    if let Err(err) = std::fs::create_dir_all(&cfg.dir) {
        eprintln!(
            "Failed to create log directory '{}' ({err}), continuing with stdout logs",
            cfg.dir
        );
        return None;
    }

    let appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, &cfg.dir, &cfg.filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    // The guard must outlive the process for buffered writes to flush.
    let _leaked: &'static _ = Box::leak(Box::new(guard));

    Some(non_blocking)
}
