//! Tracing subscriber setup.

use crate::config_service::ENV_LOG;
use bazaar_core::config::LoggingSettings;
use bazaar_core::error::{BazaarError, Result};
use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber.
///
/// `BAZAAR_LOG` takes precedence over `settings.level`. Returns `Ok(false)`
/// when a global subscriber is already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<bool> {
    let filter = match EnvFilter::try_from_env(ENV_LOG) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level).map_err(|e| {
            BazaarError::config(format!("Invalid log level '{}': {}", settings.level, e))
        })?,
    };

    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
    {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let settings = LoggingSettings::default();
        let first = init_tracing(&settings).unwrap();
        let second = init_tracing(&settings).unwrap();
        assert!(!(first && second));
    }

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var(ENV_LOG).is_ok() {
            return;
        }
        let settings = LoggingSettings {
            level: "bazaar=[[".to_string(),
        };
        assert!(init_tracing(&settings).is_err());
    }
}
