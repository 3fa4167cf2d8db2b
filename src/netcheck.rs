use reqwest::Client;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::state::{AbortReason, SharedState};

/// Slot holding the cancellation token of the attempt currently in flight.
/// The orchestrator installs a fresh token at the start of every attempt;
/// the monitor cancels whatever token is in the slot when the network drops.
pub type AttemptSlot = Arc<Mutex<CancellationToken>>;

/// One reachability probe. Any transport error or non-success status counts
/// as unreachable.
pub async fn check_connectivity(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) => response.error_for_status().is_ok(),
        Err(_) => false,
    }
}

/// Background watchdog: polls the reachability endpoint until `shutdown` is
/// cancelled. A failed check records a recoverable abort and cancels the
/// current attempt; the monitor itself keeps running across attempts for the
/// whole job lifetime.
pub fn spawn_monitor(
    client: Client,
    url: String,
    interval: Duration,
    state: SharedState,
    current_attempt: AttemptSlot,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            if !check_connectivity(&client, &url).await {
                warn!("connectivity lost, cancelling current attempt");
                state
                    .lock()
                    .unwrap()
                    .record_abort(AbortReason::ConnectivityLost);
                let token = current_attempt.lock().unwrap().clone();
                token.cancel();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobState;

    #[tokio::test]
    async fn reachable_endpoint_reports_connected() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/generate_204")
            .with_status(204)
            .create_async()
            .await;

        let client = Client::new();
        let url = format!("{}/generate_204", server.url());
        assert!(check_connectivity(&client, &url).await);
    }

    #[tokio::test]
    async fn error_status_counts_as_unreachable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/generate_204")
            .with_status(500)
            .create_async()
            .await;

        let client = Client::new();
        let url = format!("{}/generate_204", server.url());
        assert!(!check_connectivity(&client, &url).await);
    }

    #[tokio::test]
    async fn monitor_cancels_current_attempt_on_loss() {
        let state: SharedState = Arc::new(Mutex::new(JobState::new(1)));
        let attempt_token = CancellationToken::new();
        let slot: AttemptSlot = Arc::new(Mutex::new(attempt_token.clone()));
        let shutdown = CancellationToken::new();

        // Nothing listens on this port, every poll fails immediately.
        let handle = spawn_monitor(
            Client::new(),
            "http://127.0.0.1:9/generate_204".to_string(),
            Duration::from_millis(10),
            state.clone(),
            slot,
            shutdown.clone(),
        );

        tokio::time::timeout(Duration::from_secs(5), attempt_token.cancelled())
            .await
            .expect("monitor never cancelled the attempt");
        assert_eq!(
            state.lock().unwrap().abort_reason(),
            Some(AbortReason::ConnectivityLost)
        );

        shutdown.cancel();
        handle.await.unwrap();
    }
}
