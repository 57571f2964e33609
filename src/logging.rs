//! Logging setup
//!
//! Library code logs through the `log` facade only. Hosts that do not bring
//! their own logger call [`init`] once; repeated calls are harmless.

use crate::config::LoggingConfig;

/// Install `env_logger` with the configured level as the default filter.
///
/// `RUST_LOG` still takes precedence. Returns `false` when a logger was
/// already installed.
pub fn init(config: &LoggingConfig) -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.level))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        let _ = init(&config);
        assert!(!init(&config));
    }
}
