use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;

pub const LOG_FILE_PREFIX: &str = "fieldledger.log";

/// Keeps the file sink flushing; drop it only at shutdown.
#[must_use = "dropping the guard stops the file log writer"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_new(&config.filter)
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER))
}

/// Install the global subscriber: stderr plus an optional daily rolling JSON file.
/// Stdout is left to command output.
///
/// Repeated calls are harmless; only the first subscriber wins.
pub fn init(config: &LogConfig) -> anyhow::Result<LogGuard> {
    let _ = tracing_log::LogTracer::init();

    let console = if config.json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console)
        .with(file_layer)
        .try_init();

    Ok(LogGuard { _file: guard })
}
