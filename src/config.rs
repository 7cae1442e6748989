use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_DOWNLOAD_URL: &str =
    "https://github.com/cad-manager/cad-manager/releases/latest/download/app-data.zip";
pub const DEFAULT_VERSION_URL: &str = "https://cad-manager.dev/api/v1/version";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Everything one launch run needs, passed explicitly to every component.
/// No process-wide configuration singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Where the application is (or gets) installed.
    pub install_dir: PathBuf,
    /// Versionless "latest" pointer to the release archive.
    pub download_url: String,
    /// Endpoint returning the remote version descriptor.
    pub version_url: String,
    /// Package manager used for dependency install and application start.
    pub package_manager: String,
    pub install_args: Vec<String>,
    pub start_args: Vec<String>,
    /// Command names probed by the requirement check.
    pub required_commands: Vec<String>,
    pub requirement_timeout_secs: u64,
    pub readiness_interval_ms: u64,
    pub readiness_max_attempts: u32,
    pub update_interval_secs: u64,
    /// Version of the running launcher, compared against the remote
    /// descriptor.
    pub local_version: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            install_dir: data_dir.join("cad-manager"),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            version_url: DEFAULT_VERSION_URL.to_string(),
            package_manager: "pnpm".to_string(),
            install_args: vec!["install".to_string()],
            start_args: vec!["run".to_string(), "start".to_string()],
            required_commands: vec![
                "node".to_string(),
                "pnpm".to_string(),
                "git".to_string(),
            ],
            requirement_timeout_secs: 10,
            readiness_interval_ms: 1_000,
            readiness_max_attempts: 300,
            update_interval_secs: 3_600,
            local_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl LaunchConfig {
    /// Load from a TOML file, falling back to defaults when no file is given
    /// or the default location does not exist. An explicit path that fails to
    /// read or parse is an error.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from("launchpad.toml"), false),
        };

        if !explicit && !path.exists() {
            info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let config: LaunchConfig = toml::from_str(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn requirement_timeout(&self) -> Duration {
        Duration::from_secs(self.requirement_timeout_secs)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}
