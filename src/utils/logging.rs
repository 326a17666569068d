//! Structured logging setup.
//!
//! Builds a `tracing-subscriber` fmt subscriber from [`LoggingConfig`]. The
//! `RUST_LOG` environment variable, when present, takes precedence over the
//! configured level; `filter` directives are appended on top.

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Build the env filter for `config`
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut directives = std::env::var(EnvFilter::DEFAULT_ENV)
        .unwrap_or_else(|_| config.log_level.as_str().to_lowercase());

    if let Some(ref extra) = config.filter {
        directives.push(',');
        directives.push_str(extra);
    }

    EnvFilter::try_new(&directives)
        .map_err(|e| ProtocolError::ConfigError(format!("Invalid log filter '{directives}': {e}")))
}

/// Install the global subscriber.
///
/// Fails with `ConfigError` if the filter is invalid or a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
