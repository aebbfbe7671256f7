//! Preview server readiness probing

use std::error::Error as _;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Per-request timeout for a single probe
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Polls `http://localhost:<port>/` with HEAD requests until a 2xx answer
#[derive(Debug, Clone)]
pub struct ReadinessProber {
    client: reqwest::Client,
    interval: Duration,
}

impl ReadinessProber {
    pub fn new(interval: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_REQUEST_TIMEOUT)
            .no_proxy()
            .build()?;

        Ok(Self { client, interval })
    }

    /// Wait until the server on `port` answers or `timeout` elapses.
    ///
    /// Connection errors and non-2xx statuses count as "not yet ready"; the
    /// last one observed is carried in [`Error::Timeout`].
    pub async fn wait_until_ready(&self, port: u16, timeout: Duration) -> Result<()> {
        let url = format!("http://localhost:{}/", port);
        let deadline = Instant::now() + timeout;
        let mut last_error: Option<String> = None;
        let mut attempts = 0u32;

        while Instant::now() < deadline {
            attempts += 1;

            match self.client.head(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("Preview server ready on port {} after {} probe(s)", port, attempts);
                    return Ok(());
                }
                Ok(resp) => {
                    debug!("Readiness probe returned {}", resp.status());
                    last_error = Some(format!("HTTP {}", resp.status().as_u16()));
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for preview server on port {}...", port);
                    }
                    last_error = Some(describe(&e));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            sleep(self.interval.min(remaining)).await;
        }

        Err(Error::Timeout {
            port,
            last_error: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
