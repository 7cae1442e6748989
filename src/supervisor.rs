use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::LaunchConfig;
use crate::error::LaunchError;

/// Marker the application prints when its port is already bound.
pub const PORT_CONFLICT_MARKER: &str = "EADDRINUSE";

/// A line of child output, classified by the reader tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildOutput {
    Line(String),
    /// The offending output line containing the port-in-use marker.
    PortConflict(String),
}

/// The spawned application instance. Exactly one exists per run; its
/// lifetime is tied to the launcher process, and teardown always releases
/// the listening port before killing the child.
pub struct SupervisedProcess {
    child: Child,
    port: u16,
    output_rx: mpsc::UnboundedReceiver<ChildOutput>,
}

impl SupervisedProcess {
    /// Spawn `<package_manager> run start` with the install directory as
    /// working directory and both output streams captured line-by-line.
    pub fn start(config: &LaunchConfig, port: u16) -> Result<Self, LaunchError> {
        info!(
            "Starting application: {} {:?} in {:?}",
            config.package_manager, config.start_args, config.install_dir
        );

        let mut child = Command::new(&config.package_manager)
            .args(&config.start_args)
            .current_dir(&config.install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(LaunchError::Spawn)?;

        let (tx, output_rx) = mpsc::unbounded_channel();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(watch_stream(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(watch_stream(stderr, tx));
        }

        Ok(Self {
            child,
            port,
            output_rx,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Next classified output line; `None` once both streams have closed.
    pub async fn next_output(&mut self) -> Option<ChildOutput> {
        self.output_rx.recv().await
    }

    /// Release the listening port, then kill the child. Child-process
    /// termination alone does not always free a bound port promptly, so the
    /// port release is explicit.
    pub async fn shutdown(mut self) {
        release_port(self.port).await;
        if let Err(e) = self.child.kill().await {
            warn!("failed to kill supervised process: {}", e);
        }
    }
}

async fn watch_stream(
    stream: impl AsyncRead + Unpin + Send + 'static,
    tx: mpsc::UnboundedSender<ChildOutput>,
) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("app: {}", line);
        let output = if line.contains(PORT_CONFLICT_MARKER) {
            ChildOutput::PortConflict(line)
        } else {
            ChildOutput::Line(line)
        };
        if tx.send(output).is_err() {
            break;
        }
    }
}

/// Ask the OS to free the port by terminating whatever holds it.
#[cfg(unix)]
pub async fn release_port(port: u16) {
    debug!("Releasing port {}", port);
    match Command::new("fuser")
        .args(["-k", &format!("{}/tcp", port)])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => debug!("fuser -k {}/tcp exited with {}", port, status),
        Err(e) => warn!("failed to run fuser for port {}: {}", port, e),
    }
}

#[cfg(windows)]
pub async fn release_port(port: u16) {
    debug!("Releasing port {}", port);
    let script = format!(
        "Get-NetTCPConnection -LocalPort {} -ErrorAction SilentlyContinue | \
         ForEach-Object {{ Stop-Process -Id $_.OwningProcess -Force }}",
        port
    );
    match Command::new("powershell")
        .args(["-NoProfile", "-Command", &script])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => debug!("port release for {} exited with {}", port, status),
        Err(e) => warn!("failed to release port {}: {}", port, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_config(install_dir: &std::path::Path, script: &str) -> LaunchConfig {
        LaunchConfig {
            install_dir: install_dir.to_path_buf(),
            package_manager: "sh".to_string(),
            start_args: vec!["-c".to_string(), script.to_string()],
            ..LaunchConfig::default()
        }
    }

    #[tokio::test]
    async fn forwards_output_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = shell_config(dir.path(), "echo first; echo second");

        let mut process = SupervisedProcess::start(&config, 1).unwrap();
        assert_eq!(
            process.next_output().await,
            Some(ChildOutput::Line("first".to_string()))
        );
        assert_eq!(
            process.next_output().await,
            Some(ChildOutput::Line("second".to_string()))
        );
        assert_eq!(process.next_output().await, None);
        process.shutdown().await;
    }

    #[tokio::test]
    async fn classifies_the_port_in_use_marker() {
        let dir = tempfile::tempdir().unwrap();
        let config = shell_config(dir.path(), "echo 'Error: listen EADDRINUSE :::8080' >&2");

        let mut process = SupervisedProcess::start(&config, 1).unwrap();
        let output = process.next_output().await.unwrap();
        match output {
            ChildOutput::PortConflict(line) => assert!(line.contains("EADDRINUSE")),
            other => panic!("unexpected output: {:?}", other),
        }
        process.shutdown().await;
    }

    #[tokio::test]
    async fn missing_start_command_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = LaunchConfig {
            install_dir: dir.path().to_path_buf(),
            package_manager: "launchpad-test-missing-pm".to_string(),
            ..LaunchConfig::default()
        };
        assert!(matches!(
            SupervisedProcess::start(&config, 1),
            Err(LaunchError::Spawn(_))
        ));
    }
}
