use std::sync::Once;

use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::MonitoringConfig;

static INIT: Once = Once::new();

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level when `RUST_LOG` is not set
    pub level: Level,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include source code locations
    pub source_location: bool,
    /// Whether to include thread ids
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            timestamps: true,
            source_location: false,
            thread_ids: true,
        }
    }
}

impl From<&MonitoringConfig> for LogConfig {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            level: config.log_level.into(),
            ..Default::default()
        }
    }
}

/// Initialize logging system.
///
/// Only the first call installs a subscriber; later calls are no-ops.
pub fn setup_logging(config: LogConfig) -> Result<(), String> {
    let mut result = Ok(());

    INIT.call_once(|| {
        result = setup_logging_internal(config);
    });

    result
}

fn setup_logging_internal(config: LogConfig) -> Result<(), String> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(config.thread_ids)
        .with_file(config.source_location)
        .with_line_number(config.source_location);

    if config.timestamps {
        builder
            .with_timer(UtcTime::rfc_3339())
            .try_init()
            .map_err(|e| format!("Failed to set global subscriber: {}", e))
    } else {
        builder
            .without_time()
            .try_init()
            .map_err(|e| format!("Failed to set global subscriber: {}", e))
    }
}
