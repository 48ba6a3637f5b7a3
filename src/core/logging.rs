//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::core::config::LoggingConfig;
use crate::types::{Error, Result};

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Calling this again
/// after a subscriber is installed is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::config(format!("Invalid log filter: {}", e)))?;

    let installed = match config.format.as_str() {
        "compact" => tracing_subscriber::fmt().with_env_filter(filter).compact().try_init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).pretty().try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(level = %config.level, format = %config.format, "logging initialized");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let config = LoggingConfig { level: "warn".into(), format: "compact".into() };
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
