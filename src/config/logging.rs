/// Logging initialisation
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{ConfigError, LoggingConfig};

/// Initialize logging.
///
/// `RUST_LOG` wins over the configured level; `debug` forces debug level.
/// The returned guard flushes the file writer and must be held until exit.
pub fn init_logging(config: &LoggingConfig, debug: bool) -> Result<Option<WorkerGuard>, ConfigError> {
    let default_level = if debug { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    let (writer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(Path::new(directory), "uart_bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (fmt::writer::BoxMakeWriter::new(writer), Some(guard))
        }
        None => (fmt::writer::BoxMakeWriter::new(std::io::stdout), None),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true);

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
    };
    result.map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing::info!("Logging initialized with filter: {}", default_level);
    Ok(guard)
}
