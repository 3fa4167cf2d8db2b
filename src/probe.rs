use anyhow::{bail, Context, Result};
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

const PROBE_ATTEMPTS: u32 = 3;

/// Discovers the total byte length of the resource with a metadata-only
/// request, retrying up to three times with a fixed delay in between.
/// Returns `None` once the attempts are spent; the orchestrator treats that
/// as fatal and never starts chunk work.
pub async fn probe_size(client: &Client, url: &str, retry_delay: Duration) -> Option<u64> {
    for attempt in 1..=PROBE_ATTEMPTS {
        match head_content_length(client, url).await {
            Ok(len) => return Some(len),
            Err(e) => warn!(attempt, error = %e, "size probe failed"),
        }
        if attempt < PROBE_ATTEMPTS {
            tokio::time::sleep(retry_delay).await;
        }
    }
    None
}

async fn head_content_length(client: &Client, url: &str) -> Result<u64> {
    let response = client
        .head(url)
        .send()
        .await
        .context("HEAD request failed")?;

    let status = response.status();
    if !status.is_success() {
        bail!("unexpected status {status}");
    }

    // Parse the header directly: HEAD responses carry no body, so the
    // header is the only reliable source for the total length.
    response
        .headers()
        .get(CONTENT_LENGTH)
        .context("response carries no Content-Length")?
        .to_str()?
        .parse::<u64>()
        .context("unparseable Content-Length")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_length_from_content_length_header() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("HEAD", "/file.bin")
            .with_status(200)
            .with_header("content-length", "4096")
            .create_async()
            .await;

        let client = Client::new();
        let url = format!("{}/file.bin", server.url());
        assert_eq!(probe_size(&client, &url, Duration::ZERO).await, Some(4096));
    }

    #[tokio::test]
    async fn gives_up_after_three_failed_attempts() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("HEAD", "/file.bin")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let client = Client::new();
        let url = format!("{}/file.bin", server.url());
        assert_eq!(probe_size(&client, &url, Duration::ZERO).await, None);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn transport_error_counts_as_a_failed_attempt() {
        // Nothing listens on this port, every attempt is refused.
        let client = Client::new();
        let url = "http://127.0.0.1:9/file.bin";
        assert_eq!(probe_size(&client, url, Duration::ZERO).await, None);
    }
}
