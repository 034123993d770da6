//! Path resolution for Bazaar configuration files.
//!
//! ```text
//! ~/.config/bazaar/        # Config directory (platform specific)
//! └── config.toml          # Application configuration
//! ```

use bazaar_core::error::{BazaarError, Result};
use std::path::PathBuf;

const APP_DIR: &str = "bazaar";

pub struct BazaarPaths;

impl BazaarPaths {
    /// Returns the Bazaar configuration directory.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| BazaarError::config("Cannot find config directory"))
    }

    /// Returns the path to the main configuration file.
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}
