pub mod config;
pub mod error;
pub mod events;
pub mod install;
pub mod orchestrator;
pub mod readiness;
pub mod requirements;
pub mod settings;
pub mod supervisor;
pub mod updater;

pub use config::LaunchConfig;
pub use error::LaunchError;
pub use events::{ErrorEvent, EventSender, LauncherEvent, ProgressEvent, RequirementsResult, Step};
pub use orchestrator::{LaunchedApp, Orchestrator};
pub use settings::{Settings, SettingsError};
pub use updater::{UpdateChecker, UpdateOutcome, UpdatePrompt};
