use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

pub type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Installs the global fmt subscriber. `RUST_LOG` takes precedence over the configured level.
///
/// Fails when a global subscriber is already set, so hosts that own logging can skip this.
pub fn init_logging(config: &LoggingConfig) -> Result<(), InitError> {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);
    match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
}
