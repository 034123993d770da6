//! Configuration loading.
//!
//! Reads `config.toml`, falls back to defaults for a missing or empty file,
//! then applies environment overrides.

use crate::paths::BazaarPaths;
use bazaar_core::config::BazaarConfig;
use bazaar_core::error::{BazaarError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides the credential endpoint URL.
pub const ENV_CREDENTIAL_URL: &str = "BAZAAR_CREDENTIAL_URL";
/// Overrides the log filter.
pub const ENV_LOG: &str = "BAZAAR_LOG";

pub struct ConfigService {
    path: PathBuf,
}

impl ConfigService {
    /// Creates a service for the default config file location.
    pub fn new() -> Result<Self> {
        Ok(Self::with_path(BazaarPaths::config_file()?))
    }

    /// Creates a service for a custom path (for testing).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the file only, without environment overrides.
    pub fn load_file(&self) -> Result<BazaarConfig> {
        if !self.path.exists() {
            tracing::debug!("[Config] {:?} not found, using defaults", self.path);
            return Ok(BazaarConfig::default());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BazaarConfig::default());
        }

        toml::from_str(&content).map_err(|e| {
            BazaarError::config(format!("Failed to parse {:?}: {}", self.path, e))
        })
    }

    /// Loads the file and applies process environment overrides.
    pub fn load(&self) -> Result<BazaarConfig> {
        let mut config = self.load_file()?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        tracing::info!(
            "[Config] Loaded configuration (credential endpoint: {})",
            if config.credential.endpoint_url.is_some() {
                "configured"
            } else {
                "none"
            }
        );
        Ok(config)
    }
}

/// Applies environment overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut BazaarConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_CREDENTIAL_URL).filter(|url| !url.is_empty()) {
        config.credential.endpoint_url = Some(url);
    }
    if let Some(level) = lookup(ENV_LOG).filter(|level| !level.is_empty()) {
        config.logging.level = level;
    }
}
