use std::process::Stdio;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Probe each command with a `--version` invocation, concurrently, each with
/// a bounded wait. Returns the names that are missing: lookup failed, spawn
/// failed, the wait elapsed, or the exit status was non-zero. An empty result
/// means all requirements are present.
pub async fn check_requirements(commands: &[String], per_command_timeout: Duration) -> Vec<String> {
    let checks = commands
        .iter()
        .map(|command| check_one(command.clone(), per_command_timeout));

    join_all(checks).await.into_iter().flatten().collect()
}

async fn check_one(command: String, wait: Duration) -> Option<String> {
    // Fast path: no such executable on PATH.
    if which::which(&command).is_err() {
        debug!("requirement {} not found on PATH", command);
        return Some(command);
    }

    let spawned = Command::new(&command)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            debug!("requirement {} failed to spawn: {}", command, e);
            return Some(command);
        }
    };

    match timeout(wait, child.wait()).await {
        Ok(Ok(status)) if status.success() => None,
        Ok(Ok(status)) => {
            debug!("requirement {} exited with {}", command, status);
            Some(command)
        }
        Ok(Err(e)) => {
            debug!("requirement {} wait failed: {}", command, e);
            Some(command)
        }
        Err(_) => {
            debug!("requirement {} timed out after {:?}", command, wait);
            Some(command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmds(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn all_absent_commands_are_reported_regardless_of_order() {
        let missing = check_requirements(
            &cmds(&[
                "launchpad-test-missing-a",
                "launchpad-test-missing-b",
                "launchpad-test-missing-c",
            ]),
            Duration::from_secs(5),
        )
        .await;

        let mut sorted = missing.clone();
        sorted.sort();
        assert_eq!(
            sorted,
            cmds(&[
                "launchpad-test-missing-a",
                "launchpad-test-missing-b",
                "launchpad-test-missing-c",
            ])
        );
    }

    #[tokio::test]
    async fn present_commands_are_not_reported() {
        // cargo and rustc are guaranteed to exist wherever the tests build.
        let missing =
            check_requirements(&cmds(&["cargo", "rustc"]), Duration::from_secs(30)).await;
        assert!(missing.is_empty(), "unexpected missing: {:?}", missing);
    }

    #[tokio::test]
    async fn mixed_set_reports_only_the_absent_ones() {
        let missing = check_requirements(
            &cmds(&["cargo", "launchpad-test-missing-a"]),
            Duration::from_secs(30),
        )
        .await;
        assert_eq!(missing, cmds(&["launchpad-test-missing-a"]));
    }
}
