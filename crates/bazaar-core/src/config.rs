//! Configuration model.
//!
//! Every field has a default so a missing or partial `config.toml` still
//! yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct BazaarConfig {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub credential: CredentialSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Timing knobs for the token refresh cycle.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// How long before expiry the next refresh fires.
    #[serde(default = "default_safety_gap_ms")]
    pub safety_gap_ms: u64,
    /// Wait before the single retry after a `NotProvisioned` response.
    #[serde(default = "default_not_provisioned_retry_ms")]
    pub not_provisioned_retry_ms: u64,
    /// Floor applied to back-to-back immediate refreshes.
    #[serde(default = "default_min_refresh_delay_ms")]
    pub min_refresh_delay_ms: u64,
}

fn default_safety_gap_ms() -> u64 {
    2_000
}

fn default_not_provisioned_retry_ms() -> u64 {
    3_000
}

fn default_min_refresh_delay_ms() -> u64 {
    1_000
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            safety_gap_ms: default_safety_gap_ms(),
            not_provisioned_retry_ms: default_not_provisioned_retry_ms(),
            min_refresh_delay_ms: default_min_refresh_delay_ms(),
        }
    }
}

impl SessionSettings {
    pub fn safety_gap(&self) -> Duration {
        Duration::from_millis(self.safety_gap_ms)
    }

    pub fn not_provisioned_retry(&self) -> Duration {
        Duration::from_millis(self.not_provisioned_retry_ms)
    }

    pub fn min_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.min_refresh_delay_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CredentialSettings {
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
