use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::LaunchConfig;
use crate::error::LaunchError;

/// How many captured output lines a dependency-install failure carries.
const ERROR_TAIL_LINES: usize = 10;

/// Download the release archive and unpack it into the install directory.
pub async fn fetch_release(config: &LaunchConfig) -> Result<(), LaunchError> {
    info!(
        "Downloading release from {} into {:?}",
        config.download_url, config.install_dir
    );
    release_fetcher::download_and_extract(&config.download_url, &config.install_dir)
        .await
        .map_err(LaunchError::Download)
}

/// Run the package manager's install step inside the install directory,
/// capturing its output line-by-line into `trace`. Any non-zero exit is
/// fatal and carries the captured tail.
pub async fn install_dependencies(
    config: &LaunchConfig,
    trace: &mut Vec<String>,
) -> Result<(), LaunchError> {
    info!(
        "Installing dependencies with {} {:?}",
        config.package_manager, config.install_args
    );

    let mut child = Command::new(&config.package_manager)
        .args(&config.install_args)
        .current_dir(&config.install_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(LaunchError::Spawn)?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut out_lines = stdout.map(|s| BufReader::new(s).lines());
    let mut err_lines = stderr.map(|s| BufReader::new(s).lines());

    let mut captured: Vec<String> = Vec::new();
    let mut out_done = out_lines.is_none();
    let mut err_done = err_lines.is_none();

    while !out_done || !err_done {
        tokio::select! {
            line = async {
                match out_lines.as_mut() {
                    Some(lines) => lines.next_line().await,
                    None => Ok(None),
                }
            }, if !out_done => match line {
                Ok(Some(line)) => {
                    debug!("install: {}", line);
                    captured.push(line);
                }
                _ => out_done = true,
            },
            line = async {
                match err_lines.as_mut() {
                    Some(lines) => lines.next_line().await,
                    None => Ok(None),
                }
            }, if !err_done => match line {
                Ok(Some(line)) => {
                    debug!("install: {}", line);
                    captured.push(line);
                }
                _ => err_done = true,
            },
        }
    }

    let status = child.wait().await.map_err(LaunchError::Spawn)?;

    trace.extend(captured.iter().cloned());

    if !status.success() {
        let tail_start = captured.len().saturating_sub(ERROR_TAIL_LINES);
        return Err(LaunchError::DependencyInstall {
            code: status.code(),
            tail: captured[tail_start..].to_vec(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(install_dir: &std::path::Path, args: &[&str]) -> LaunchConfig {
        LaunchConfig {
            install_dir: install_dir.to_path_buf(),
            package_manager: "sh".to_string(),
            install_args: args.iter().map(|s| s.to_string()).collect(),
            ..LaunchConfig::default()
        }
    }

    #[tokio::test]
    async fn successful_install_captures_output_into_trace() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &["-c", "echo resolving; echo done"]);

        let mut trace = Vec::new();
        install_dependencies(&config, &mut trace).await.unwrap();

        assert!(trace.contains(&"resolving".to_string()));
        assert!(trace.contains(&"done".to_string()));
    }

    #[tokio::test]
    async fn non_zero_exit_is_fatal_and_carries_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &["-c", "echo fetching; echo ERR_PNPM_FETCH >&2; exit 1"]);

        let mut trace = Vec::new();
        let err = install_dependencies(&config, &mut trace).await.unwrap_err();

        match err {
            LaunchError::DependencyInstall { code, tail } => {
                assert_eq!(code, Some(1));
                assert!(tail.iter().any(|l| l.contains("ERR_PNPM_FETCH")));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Output still reached the trace before the failure surfaced.
        assert!(trace.iter().any(|l| l.contains("fetching")));
    }

    #[tokio::test]
    async fn missing_package_manager_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = LaunchConfig {
            install_dir: dir.path().to_path_buf(),
            package_manager: "launchpad-test-missing-pm".to_string(),
            ..LaunchConfig::default()
        };

        let mut trace = Vec::new();
        let err = install_dependencies(&config, &mut trace).await.unwrap_err();
        assert!(matches!(err, LaunchError::Spawn(_)));
    }
}
