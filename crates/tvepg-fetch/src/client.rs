//! `EpgFetcher` - HTTP client for XMLTV feeds.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{Client, StatusCode};
use tracing::instrument;
use url::Url;

use super::api::LocalEpgFetch;
use super::decode::decode_body;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Default upper bound for the retry delay.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// HTTP client for EPG feeds.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct EpgFetcher {
    /// HTTP client (reqwest, gzip enabled).
    http_client: Client,
    /// Retries after the first attempt.
    max_retries: u32,
    /// Delay before the first retry.
    initial_backoff: Duration,
    /// Cap for the retry delay.
    max_backoff: Duration,
}

/// Builder for `EpgFetcher`.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct EpgFetcherBuilder {
    user_agent: Option<String>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
}

impl EpgFetcherBuilder {
    /// Creates a new builder.
    const fn new() -> Self {
        Self {
            user_agent: None,
            timeout: None,
            max_retries: None,
            initial_backoff: None,
            max_backoff: None,
        }
    }

    /// Sets the User-Agent (required).
    #[must_use]
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the per-request timeout (default: 30s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the number of retries after the first attempt (default: 3).
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the delay before the first retry (default: 2s).
    #[must_use]
    pub const fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the retry delay cap (default: 30s).
    #[must_use]
    pub const fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// - `user_agent` is not set.
    /// - `reqwest::Client` build fails.
    pub fn build(self) -> Result<EpgFetcher> {
        let user_agent = self.user_agent.context("user_agent is required")?;

        let http_client = Client::builder()
            .user_agent(&user_agent)
            .gzip(true)
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .context("failed to build HTTP client")?;

        Ok(EpgFetcher {
            http_client,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            initial_backoff: self.initial_backoff.unwrap_or(DEFAULT_INITIAL_BACKOFF),
            max_backoff: self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF),
        })
    }
}

impl EpgFetcher {
    /// Creates a new builder.
    #[must_use]
    pub const fn builder() -> EpgFetcherBuilder {
        EpgFetcherBuilder::new()
    }

    /// Delay before retry number `attempt + 1`: doubles from
    /// `initial_backoff`, capped at `max_backoff`.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    /// Downloads a URL and returns the raw body.
    ///
    /// Transport errors, 5xx and 429 responses are retried up to
    /// `max_retries` times. A numeric `Retry-After` on 429 replaces the
    /// computed backoff. Any other non-success status fails at once.
    ///
    /// # Errors
    ///
    /// Returns the last error once all attempts are used up, or the HTTP
    /// status error for non-retryable responses.
    #[instrument(skip_all, fields(%url))]
    pub async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = last_err
                    .as_ref()
                    .and_then(|e: &RetryError| e.retry_after)
                    .unwrap_or_else(|| self.backoff(attempt.saturating_sub(1)));
                tracing::debug!(attempt, ?delay, "Waiting before retry");
                tokio::time::sleep(delay).await;
            }

            let response = match self.http_client.get(url.clone()).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Request failed, will retry");
                    last_err = Some(RetryError::new(
                        anyhow::Error::new(e).context(format!("request to {url} failed")),
                    ));
                    continue;
                }
            };

            let status = response.status();
            tracing::trace!(%status, headers = ?response.headers(), "Response headers");

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                tracing::warn!(
                    attempt,
                    code = status.as_u16(),
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    "Rate limited, waiting before retry"
                );
                last_err = Some(RetryError {
                    error: anyhow::anyhow!("{url} rate limited (HTTP {status})"),
                    retry_after,
                });
                continue;
            }

            if status.is_server_error() {
                tracing::warn!(attempt, code = status.as_u16(), "Server error, will retry");
                last_err = Some(RetryError::new(anyhow::anyhow!("{url} returned HTTP {status}")));
                continue;
            }

            if !status.is_success() {
                bail!("{url} returned HTTP {status}");
            }

            match response.bytes().await {
                Ok(body) => {
                    tracing::debug!(
                        code = status.as_u16(),
                        body_len = body.len(),
                        "Response body received"
                    );
                    return Ok(body.to_vec());
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        "Failed to read response body, will retry"
                    );
                    last_err = Some(RetryError::new(
                        anyhow::Error::new(e).context(format!("failed to read body of {url}")),
                    ));
                }
            }
        }

        Err(last_err.map_or_else(
            || anyhow::anyhow!("{url} failed after retries"),
            |e| e.error,
        ))
    }
}

/// Error of one attempt, with the server-requested delay if any.
struct RetryError {
    error: anyhow::Error,
    retry_after: Option<Duration>,
}

impl RetryError {
    const fn new(error: anyhow::Error) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

impl LocalEpgFetch for EpgFetcher {
    #[instrument(skip_all)]
    async fn fetch(&self, url: &Url) -> Result<String> {
        let bytes = self.fetch_bytes(url).await?;
        decode_body(&bytes).with_context(|| format!("failed to decode body of {url}"))
    }
}
