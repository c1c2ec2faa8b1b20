///! Metrics client setup for CLI commands

use anyhow::{Context, Result};
use console_monitoring::client::DEFAULT_REQUEST_TIMEOUT;
use console_monitoring::PrometheusClient;
use std::time::Duration;

/// Extra time on top of the server-side query timeout before giving up locally
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Build a client for `server`, authenticated with `token` if given
pub async fn connect(
    server: &str,
    token: Option<&str>,
    query_timeout: Option<Duration>,
) -> Result<PrometheusClient> {
    let timeout = query_timeout
        .map(|timeout| timeout + CLIENT_TIMEOUT_SLACK)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
    let client = PrometheusClient::with_timeout(server, timeout).context("Failed to create HTTP client")?;

    if let Some(token) = token {
        client.set_token(token.to_string()).await;
    }

    Ok(client)
}
