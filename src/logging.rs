//! Tracing/logging initialization.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process from a [`LoggingConfig`].
///
/// `RUST_LOG` takes precedence over the configured level. Safe to call
/// multiple times (subsequent calls are no-ops).
pub fn init_logging(config: &LoggingConfig) {
    let level: tracing::Level = config.level.into();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_targets);

    let result = match (config.json_format, config.include_timestamps) {
        (true, true) => builder.json().try_init(),
        (true, false) => builder.json().without_time().try_init(),
        (false, true) => builder.with_ansi(config.colored).try_init(),
        (false, false) => builder.with_ansi(config.colored).without_time().try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already set; keeping the existing one");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnvilConfig;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(&AnvilConfig::testing().logging);
        init_logging(&AnvilConfig::production().logging);
    }
}
