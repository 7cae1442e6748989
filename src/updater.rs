use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LaunchConfig;
use crate::events::{EventSender, LauncherEvent};

/// Seam for the yes/no update decision; the console consumer answers with a
/// terminal prompt, tests with a recorder.
#[async_trait]
pub trait UpdatePrompt: Send + Sync {
    async fn confirm_update(&self, version: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate,
    Declined { version: String },
    Accepted { version: String },
    CheckFailed { reason: String },
}

/// Recurring background check of the remote version descriptor. Started by
/// the consumer once the application is ready; runs until cancelled, the
/// consumer accepts an update, or process exit.
pub struct UpdateChecker {
    client: reqwest::Client,
    version_url: String,
    local_version: String,
    interval: Duration,
    events: EventSender,
}

impl UpdateChecker {
    pub fn new(config: &LaunchConfig, events: EventSender) -> Self {
        Self {
            client: reqwest::Client::new(),
            version_url: config.version_url.clone(),
            local_version: config.local_version.clone(),
            interval: config.update_interval(),
            events,
        }
    }

    /// One check cycle: fetch the descriptor, compare semantically, prompt
    /// on a strictly newer remote version. Fetch or parse failure is a
    /// non-fatal notice.
    pub async fn check_once(&self, prompt: &dyn UpdatePrompt) -> UpdateOutcome {
        let remote = match self.fetch_remote_version().await {
            Ok(version) => version,
            Err(reason) => {
                warn!("update check failed: {}", reason);
                return UpdateOutcome::CheckFailed { reason };
            }
        };

        match self_update::version::bump_is_greater(&self.local_version, &remote) {
            Ok(true) => {
                info!(
                    "Update available: {} (running {})",
                    remote, self.local_version
                );
                self.events.send(LauncherEvent::UpdateAvailable {
                    version: remote.clone(),
                });

                if prompt.confirm_update(&remote).await {
                    // The external update mechanism takes over from here.
                    self.events.send(LauncherEvent::UpdateAccepted {
                        version: remote.clone(),
                    });
                    UpdateOutcome::Accepted { version: remote }
                } else {
                    UpdateOutcome::Declined { version: remote }
                }
            }
            Ok(false) => {
                debug!("running version {} is current", self.local_version);
                UpdateOutcome::UpToDate
            }
            Err(e) => {
                warn!("could not compare versions: {}", e);
                UpdateOutcome::CheckFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn fetch_remote_version(&self) -> Result<String, String> {
        let response = self
            .client
            .get(&self.version_url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let body = response.text().await.map_err(|e| e.to_string())?;
        let version = body.trim().to_string();
        if version.is_empty() {
            return Err("empty version descriptor".to_string());
        }
        Ok(version)
    }

    /// Run the loop on its own task. The first check happens immediately;
    /// later checks are spaced by the configured interval. Cancellation stops
    /// the loop cleanly on shutdown.
    pub fn spawn(
        self,
        prompt: Arc<dyn UpdatePrompt>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("update checker cancelled");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                if let UpdateOutcome::Accepted { version } =
                    self.check_once(prompt.as_ref()).await
                {
                    info!("update to {} accepted, stopping checks", version);
                    return;
                }
            }
        })
    }
}
