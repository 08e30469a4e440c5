//! Logging initialization.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{log_dir, LoggingConfig};

/// Initialize tracing. `RUST_LOG` overrides the configured level.
///
/// When file logging is enabled, a daily-rolling file under
/// `~/.remindbot/logs` is written in addition to stderr; the returned
/// guard must be held for the lifetime of the process.
pub fn init(cfg: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.level.clone()));

    if cfg.file {
        let dir = log_dir();
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(dir, "remindbot.log");
        let (file_writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(fmt::layer().with_writer(file_writer).with_ansi(false))
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        Ok(None)
    }
}
