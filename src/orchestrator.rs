use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::LaunchConfig;
use crate::error::LaunchError;
use crate::events::{EventSender, Step};
use crate::install;
use crate::readiness;
use crate::settings::Settings;
use crate::supervisor::{ChildOutput, SupervisedProcess};

/// Install directories with a run in flight. Two triggers racing on the same
/// directory must not interleave installs, so the second fails fast.
static ACTIVE_RUNS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

struct RunGuard {
    key: PathBuf,
}

impl RunGuard {
    fn acquire(install_dir: &Path) -> Result<Self, LaunchError> {
        // The same directory can be spelled multiple ways (symlink, `..`
        // components), so the lock keys on the canonical path. A directory
        // that does not exist yet has exactly one spelling; use it as-is.
        let key = install_dir
            .canonicalize()
            .unwrap_or_else(|_| install_dir.to_path_buf());
        let mut active = ACTIVE_RUNS.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key.clone()) {
            return Err(LaunchError::RunInProgress { install_dir: key });
        }
        Ok(RunGuard { key })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut active = ACTIVE_RUNS.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.key);
    }
}

/// Ordered accumulation of progress and diagnostic lines for one run,
/// surfaced in full when the run fails. Owned by the orchestrator and handed
/// to the post-ready monitor afterwards.
#[derive(Default)]
struct Trace {
    lines: Vec<String>,
}

impl Trace {
    fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        debug!("trace: {}", line);
        self.lines.push(line);
    }
}

/// Handle to the running application after a successful launch. Shutting
/// down releases the application's port and kills the supervised child.
pub struct LaunchedApp {
    port: u16,
    shutdown_tx: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

impl LaunchedApp {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.monitor.await {
            warn!("monitor task ended abnormally: {}", e);
        }
    }
}

/// The install/launch state machine:
/// `CheckingInstallation → {InstallationFound, Installing} →
/// StartingApplication → PollingReadiness → Ready | Error`.
///
/// Every successful transition emits exactly one progress event; a failure
/// terminates the run with exactly one error event carrying the full trace.
pub struct Orchestrator {
    config: LaunchConfig,
    events: EventSender,
    client: reqwest::Client,
}

impl Orchestrator {
    pub fn new(config: LaunchConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            client: reqwest::Client::new(),
        }
    }

    /// Drive one run to its terminal state. Returns the live application on
    /// `Ready`; returns `None` after an error event has been emitted. A
    /// fresh attempt requires a new invocation.
    pub async fn run(self) -> Option<LaunchedApp> {
        let mut trace = Trace::default();

        let _guard = match RunGuard::acquire(&self.config.install_dir) {
            Ok(guard) => guard,
            Err(err) => {
                self.fail(&mut trace, err);
                return None;
            }
        };

        match self.run_inner(&mut trace).await {
            Ok(process) => {
                let url = format!("http://localhost:{}", process.port());
                self.progress(
                    &mut trace,
                    Step::Ready,
                    format!("Application started successfully -> {}", url),
                );
                Some(self.hand_off(process, trace))
            }
            Err(err) => {
                self.fail(&mut trace, err);
                None
            }
        }
    }

    async fn run_inner(&self, trace: &mut Trace) -> Result<SupervisedProcess, LaunchError> {
        self.progress(
            trace,
            Step::CheckingInstallation,
            "Checking for existing installation...",
        );

        let settings = if self.config.install_dir.is_dir() {
            self.progress(
                trace,
                Step::InstallationFound,
                "An existing installation was found. Using existing installation...",
            );
            self.load_settings(trace).await?
        } else {
            self.install(trace).await?
        };

        self.progress(trace, Step::Starting, "Starting the application...");
        let mut process = SupervisedProcess::start(&self.config, settings.port)?;

        self.progress(
            trace,
            Step::PollingReadiness,
            format!("Waiting for http://localhost:{}...", settings.port),
        );
        if let Err(err) = self.poll_ready(&mut process, trace).await {
            process.shutdown().await;
            return Err(err);
        }

        Ok(process)
    }

    /// The fresh-install branch: create the directory, fetch and unpack the
    /// release, install dependencies, then read the settings the archive
    /// brought along. A dependency-install failure is terminal; the
    /// application is never started on top of a half-installed tree.
    async fn install(&self, trace: &mut Trace) -> Result<Settings, LaunchError> {
        self.progress(
            trace,
            Step::Installing,
            "No existing installation found. Installing...",
        );

        tokio::fs::create_dir_all(&self.config.install_dir)
            .await
            .map_err(LaunchError::CreateInstallDir)?;

        install::fetch_release(&self.config).await?;
        self.progress(
            trace,
            Step::Downloaded,
            "Downloaded & extracted the latest release",
        );

        trace.push("Installing dependencies...");
        install::install_dependencies(&self.config, &mut trace.lines).await?;
        self.progress(trace, Step::DependenciesInstalled, "Dependencies installed");

        self.load_settings(trace).await
    }

    async fn load_settings(&self, trace: &mut Trace) -> Result<Settings, LaunchError> {
        let settings = Settings::load(&self.config.install_dir)
            .await
            .map_err(|e| LaunchError::from_settings(e, self.config.install_dir.clone()))?;
        trace.push(format!("Settings loaded, port {}", settings.port));
        Ok(settings)
    }

    /// Poll readiness while draining child output into the trace. A
    /// port-conflict line aborts immediately; the caller tears the child
    /// down.
    async fn poll_ready(
        &self,
        process: &mut SupervisedProcess,
        trace: &mut Trace,
    ) -> Result<(), LaunchError> {
        let port = process.port();
        let ready = readiness::wait_until_ready(
            &self.client,
            port,
            self.config.readiness_interval(),
            self.config.readiness_max_attempts,
        );
        tokio::pin!(ready);

        let mut output_done = false;
        loop {
            tokio::select! {
                result = &mut ready => return result,
                output = process.next_output(), if !output_done => match output {
                    Some(ChildOutput::PortConflict(line)) => {
                        trace.push(line);
                        return Err(LaunchError::PortConflict { port });
                    }
                    Some(ChildOutput::Line(line)) => trace.push(line),
                    // Streams closed; the process may have exited. Keep
                    // polling until readiness succeeds or times out.
                    None => output_done = true,
                },
            }
        }
    }

    /// After `Ready`, output monitoring moves to a background task so a late
    /// port conflict still surfaces as an error event, and so teardown stays
    /// reachable from the returned handle.
    fn hand_off(&self, mut process: SupervisedProcess, mut trace: Trace) -> LaunchedApp {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let events = self.events.clone();
        let port = process.port();

        let monitor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        process.shutdown().await;
                        return;
                    }
                    output = process.next_output() => match output {
                        Some(ChildOutput::PortConflict(line)) => {
                            trace.push(line);
                            let err = LaunchError::PortConflict { port };
                            for detail in err.trace_lines() {
                                trace.push(detail);
                            }
                            events.error(err.label(), trace.lines.clone());
                            process.shutdown().await;
                            return;
                        }
                        Some(ChildOutput::Line(line)) => trace.push(line),
                        None => {
                            // Output is gone; wait for the shutdown signal.
                            let _ = (&mut shutdown_rx).await;
                            process.shutdown().await;
                            return;
                        }
                    }
                }
            }
        });

        info!("Application is live on port {}", port);

        LaunchedApp {
            port,
            shutdown_tx,
            monitor,
        }
    }

    fn progress(&self, trace: &mut Trace, step: Step, status: impl Into<String>) {
        let status = status.into();
        info!("[{}] {}", step, status);
        trace.push(status.clone());
        self.events.progress(step, status);
    }

    fn fail(&self, trace: &mut Trace, err: LaunchError) {
        error!("launch failed: {}", err);
        for line in err.trace_lines() {
            trace.push(line);
        }
        self.events.error(err.label(), trace.lines.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_guard_serializes_and_releases_a_directory() {
        let dir = tempfile::tempdir().unwrap();

        let guard = RunGuard::acquire(dir.path()).unwrap();
        assert!(matches!(
            RunGuard::acquire(dir.path()),
            Err(LaunchError::RunInProgress { .. })
        ));

        drop(guard);
        assert!(RunGuard::acquire(dir.path()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn run_guard_rejects_an_alias_of_a_held_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let real = scratch.path().join("install");
        std::fs::create_dir(&real).unwrap();
        let alias = scratch.path().join("alias");
        std::os::unix::fs::symlink(&real, &alias).unwrap();

        let _guard = RunGuard::acquire(&real).unwrap();
        assert!(matches!(
            RunGuard::acquire(&alias),
            Err(LaunchError::RunInProgress { .. })
        ));
    }
}
