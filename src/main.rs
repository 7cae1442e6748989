use std::path::PathBuf;
use std::sync::Arc;

use async_channel::Receiver;
use async_trait::async_trait;
use clap::Parser;
use dialoguer::Confirm;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use launchpad::config::LaunchConfig;
use launchpad::events::{self, LauncherEvent};
use launchpad::orchestrator::Orchestrator;
use launchpad::requirements::check_requirements;
use launchpad::updater::{UpdateChecker, UpdatePrompt};

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(about = "Installer/launcher for the CAD Manager server")]
#[command(version)]
struct Cli {
    /// Override the installation directory
    #[arg(long)]
    install_dir: Option<PathBuf>,

    /// Path to a launchpad.toml config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not run the recurring update check
    #[arg(long)]
    skip_update_check: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = match LaunchConfig::load(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(install_dir) = cli.install_dir {
        config.install_dir = install_dir;
    }

    let (events, rx) = events::channel();
    let consumer = tokio::spawn(consume_events(rx));

    // Requirement gate: nothing proceeds while required tools are absent.
    let missing =
        check_requirements(&config.required_commands, config.requirement_timeout()).await;
    events.requirements(missing.clone());
    if !missing.is_empty() {
        drop(events);
        let _ = consumer.await;
        std::process::exit(1);
    }

    let orchestrator = Orchestrator::new(config.clone(), events.clone());
    let Some(app) = orchestrator.run().await else {
        drop(events);
        let _ = consumer.await;
        std::process::exit(1);
    };

    info!("Open {} to use the application", app.url());

    let cancel = CancellationToken::new();
    let update_task = if cli.skip_update_check {
        None
    } else {
        let checker = UpdateChecker::new(&config, events.clone());
        Some(checker.spawn(Arc::new(ConsolePrompt), cancel.clone()))
    };

    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to listen for shutdown signal");
    }

    info!("Shutting down");
    cancel.cancel();
    if let Some(task) = update_task {
        let _ = task.await;
    }
    app.shutdown().await;

    drop(events);
    let _ = consumer.await;
}

/// Console stand-in for the display surface: renders the latest event, and
/// on error prints the full trace so it can be copied for support.
async fn consume_events(rx: Receiver<LauncherEvent>) {
    while let Ok(event) = rx.recv().await {
        match event {
            LauncherEvent::Progress(p) => println!("[{}] {}", p.step, p.status),
            LauncherEvent::Error(e) => {
                eprintln!("Error: {}", e.error);
                eprintln!("--- trace ---");
                for line in &e.trace {
                    eprintln!("{}", line);
                }
            }
            LauncherEvent::Requirements(r) => {
                if r.missing.is_empty() {
                    println!("All requirements are present");
                } else {
                    eprintln!("Missing requirements: {}", r.missing.join(", "));
                }
            }
            LauncherEvent::UpdateAvailable { version } => {
                println!("Update available: {}", version);
            }
            LauncherEvent::UpdateAccepted { version } => {
                println!("Update to {} accepted, handing off to the updater", version);
            }
        }
    }
}

struct ConsolePrompt;

#[async_trait]
impl UpdatePrompt for ConsolePrompt {
    async fn confirm_update(&self, version: &str) -> bool {
        let prompt = format!("Version {} is available. Update now?", version);
        tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false)
    }
}
