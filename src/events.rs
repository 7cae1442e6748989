use async_channel::{Receiver, Sender};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Orchestration steps, in the order a run moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    CheckingInstallation,
    InstallationFound,
    Installing,
    Downloaded,
    DependenciesInstalled,
    Starting,
    PollingReadiness,
    Ready,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::CheckingInstallation => "Checking Installation",
            Step::InstallationFound => "Installation Found",
            Step::Installing => "Installing",
            Step::Downloaded => "Downloaded",
            Step::DependenciesInstalled => "Dependencies Installed",
            Step::Starting => "Starting",
            Step::PollingReadiness => "Polling Readiness",
            Step::Ready => "Ready",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub step: Step,
    pub status: String,
}

/// Terminal failure for a run. `trace` carries every prior progress message
/// plus the failure detail, in causal order.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub error: String,
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequirementsResult {
    pub missing: Vec<String>,
}

/// Everything the orchestrator publishes to the display surface.
#[derive(Debug, Clone, Serialize)]
pub enum LauncherEvent {
    Progress(ProgressEvent),
    Error(ErrorEvent),
    Requirements(RequirementsResult),
    UpdateAvailable { version: String },
    UpdateAccepted { version: String },
}

pub fn channel() -> (EventSender, Receiver<LauncherEvent>) {
    let (tx, rx) = async_channel::unbounded();
    (EventSender { tx }, rx)
}

/// Cloneable publishing half of the event channel. Sends never block; events
/// for one run arrive in emission order.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<LauncherEvent>,
}

impl EventSender {
    pub fn send(&self, event: LauncherEvent) {
        // The channel only rejects sends once the consumer is gone.
        if self.tx.try_send(event).is_err() {
            debug!("event consumer is gone, dropping event");
        }
    }

    pub fn progress(&self, step: Step, status: impl Into<String>) {
        self.send(LauncherEvent::Progress(ProgressEvent {
            step,
            status: status.into(),
        }));
    }

    pub fn error(&self, error: impl Into<String>, trace: Vec<String>) {
        self.send(LauncherEvent::Error(ErrorEvent {
            error: error.into(),
            trace,
        }));
    }

    pub fn requirements(&self, missing: Vec<String>) {
        self.send(LauncherEvent::Requirements(RequirementsResult { missing }));
    }
}
