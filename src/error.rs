use std::path::PathBuf;

use release_fetcher::FetchError;
use thiserror::Error;

use crate::settings::SettingsError;

/// Everything that can terminate an install/launch run. Missing requirements
/// are reported as data, not as an error.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("another launch is already running for {}", install_dir.display())]
    RunInProgress { install_dir: PathBuf },

    #[error("settings.json not found in {}", install_dir.display())]
    SettingsNotFound { install_dir: PathBuf },

    #[error("settings.json in {} is corrupt: {reason}", install_dir.display())]
    SettingsCorrupt { install_dir: PathBuf, reason: String },

    #[error("failed to create the installation directory: {0}")]
    CreateInstallDir(#[source] std::io::Error),

    #[error("download failed: {0}")]
    Download(#[from] FetchError),

    #[error("dependency install exited with status {code:?}")]
    DependencyInstall { code: Option<i32>, tail: Vec<String> },

    #[error("failed to spawn the application: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("port {port} is already in use")]
    PortConflict { port: u16 },

    #[error("application on port {port} was not ready after {attempts} attempts")]
    ReadinessTimeout { port: u16, attempts: u32 },
}

impl LaunchError {
    /// Stable short label rendered by the consumer.
    pub fn label(&self) -> &'static str {
        match self {
            LaunchError::RunInProgress { .. } => "Launch already in progress",
            LaunchError::SettingsNotFound { .. } => "settings.json not found",
            LaunchError::SettingsCorrupt { .. } => "Port not found",
            LaunchError::CreateInstallDir(_) => "An error occurred",
            LaunchError::Download(_) => "Download failed",
            LaunchError::DependencyInstall { .. } => "Dependency install failed",
            LaunchError::Spawn(_) => "Failed to start",
            LaunchError::PortConflict { .. } => "Port in use",
            LaunchError::ReadinessTimeout { .. } => "Application never became ready",
        }
    }

    /// Lines appended to the trace when the run fails: the failure detail
    /// followed by the user-actionable recovery hint, where one exists.
    pub fn trace_lines(&self) -> Vec<String> {
        match self {
            LaunchError::RunInProgress { install_dir } => vec![format!(
                "Another launch is already running for {}",
                install_dir.display()
            )],
            LaunchError::SettingsNotFound { install_dir } => vec![
                "settings.json not found".to_string(),
                format!(
                    "Please delete the directory: {} and launch this application again.",
                    install_dir.display()
                ),
            ],
            LaunchError::SettingsCorrupt { install_dir, reason } => vec![
                format!("Port not found in settings.json ({})", reason),
                format!(
                    "Please delete the directory: {} and launch this application again.",
                    install_dir.display()
                ),
            ],
            LaunchError::CreateInstallDir(e) => {
                vec![format!("Failed to create the installation directory: {}", e)]
            }
            LaunchError::Download(e) => vec![e.to_string()],
            LaunchError::DependencyInstall { tail, .. } => {
                let mut lines = vec!["An error occurred while installing dependencies".to_string()];
                lines.extend(tail.iter().cloned());
                lines
            }
            LaunchError::Spawn(e) => vec![format!("Failed to start the application: {}", e)],
            LaunchError::PortConflict { port } => vec![
                format!("Port {} is already in use", port),
                "Please close the application using the port and try again.".to_string(),
            ],
            LaunchError::ReadinessTimeout { port, attempts } => vec![format!(
                "The application did not respond on http://localhost:{} after {} attempts",
                port, attempts
            )],
        }
    }

    pub fn from_settings(err: SettingsError, install_dir: PathBuf) -> Self {
        match err {
            SettingsError::NotFound => LaunchError::SettingsNotFound { install_dir },
            SettingsError::Corrupt(reason) => LaunchError::SettingsCorrupt { install_dir, reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_consumer_contract() {
        let dir = PathBuf::from("/tmp/x");
        assert_eq!(
            LaunchError::SettingsNotFound { install_dir: dir.clone() }.label(),
            "settings.json not found"
        );
        assert_eq!(LaunchError::PortConflict { port: 3000 }.label(), "Port in use");
        assert_eq!(
            LaunchError::SettingsCorrupt { install_dir: dir, reason: "x".into() }.label(),
            "Port not found"
        );
    }

    #[test]
    fn settings_errors_carry_the_delete_hint() {
        let err = LaunchError::SettingsNotFound {
            install_dir: PathBuf::from("/data/cad-manager"),
        };
        let lines = err.trace_lines();
        assert_eq!(lines[0], "settings.json not found");
        assert!(lines[1].contains("/data/cad-manager"));
        assert!(lines[1].contains("delete the directory"));
    }
}
