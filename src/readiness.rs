use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::LaunchError;

/// Poll `http://localhost:<port>` until it answers with a success status.
/// One attempt per interval; exceeding the attempt budget is a
/// `ReadinessTimeout`. The sleeps suspend only this flow, so queued events
/// still reach the consumer between attempts.
pub async fn wait_until_ready(
    client: &reqwest::Client,
    port: u16,
    interval: Duration,
    max_attempts: u32,
) -> Result<(), LaunchError> {
    let url = format!("http://localhost:{}", port);

    for attempt in 1..=max_attempts {
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("{} is ready after {} attempt(s)", url, attempt);
                return Ok(());
            }
            Ok(response) => {
                debug!("readiness attempt {}: status {}", attempt, response.status());
            }
            Err(e) => {
                debug!("readiness attempt {}: {}", attempt, e);
            }
        }
        sleep(interval).await;
    }

    Err(LaunchError::ReadinessTimeout {
        port,
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP fixture answering every connection with the given status
    /// line until dropped.
    async fn serve_status(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response =
                        format!("{}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn resolves_once_the_endpoint_answers_ok() {
        let port = serve_status("HTTP/1.1 200 OK").await;
        let client = reqwest::Client::new();
        wait_until_ready(&client, port, Duration::from_millis(10), 50)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_statuses_do_not_count_as_ready() {
        let port = serve_status("HTTP/1.1 503 Service Unavailable").await;
        let client = reqwest::Client::new();
        let err = wait_until_ready(&client, port, Duration::from_millis(10), 3)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::ReadinessTimeout { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn unreachable_port_times_out() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = reqwest::Client::new();
        let err = wait_until_ready(&client, port, Duration::from_millis(10), 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::ReadinessTimeout { attempts: 2, .. }
        ));
    }
}
