use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Relative location of the installed application's settings document.
pub const SETTINGS_RELATIVE_PATH: &str = "apps/api/data/settings.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings.json not found")]
    NotFound,

    #[error("settings.json is corrupt: {0}")]
    Corrupt(String),
}

/// Persisted configuration of the installed application. Read-only input for
/// the launcher; never written by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub port: u16,
}

impl Settings {
    /// Load the settings document from inside `install_dir`. A document that
    /// exists but lacks a valid positive port is corrupt, which the caller
    /// must surface as fatal and user-actionable.
    pub async fn load(install_dir: &Path) -> Result<Self, SettingsError> {
        let path = install_dir.join(SETTINGS_RELATIVE_PATH);

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SettingsError::NotFound)
            }
            Err(e) => return Err(SettingsError::Corrupt(e.to_string())),
        };

        let settings: Settings =
            serde_json::from_str(&raw).map_err(|e| SettingsError::Corrupt(e.to_string()))?;
        if settings.port == 0 {
            return Err(SettingsError::Corrupt(
                "port must be a positive integer".to_string(),
            ));
        }

        debug!("Loaded settings from {:?}: port {}", path, settings.port);

        Ok(settings)
    }
}
