mod config;
mod settings;

pub use config::{ApiConfig, Config};
pub use settings::{Settings, SettingsProvider, SharedSettings, MAX_DURATION_MINUTES};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/pawmodoro[-dev]/` based on PAWMODORO_ENV.
///
/// Set PAWMODORO_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("PAWMODORO_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("pawmodoro-dev")
    } else {
        base_dir.join("pawmodoro")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
