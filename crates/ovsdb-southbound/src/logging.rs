//! Structured logging setup.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Result, SouthboundError};
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this a
/// second time in one process returns a configuration error.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| SouthboundError::config("logging.level", e.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| SouthboundError::config("logging", format!("Failed to set logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let config = LoggingConfig::default();
        // Another test in this binary may have installed a subscriber first.
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(SouthboundError::Config { .. })
        ));
    }
}
