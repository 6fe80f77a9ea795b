//! HTTP client with retry on transient failures
//!
//! Connection errors, timeouts and the statuses 408, 429, 500, 502, 503 and
//! 504 are retried with exponential backoff. `Retry-After` (seconds) is
//! honoured up to the maximum wait.

use crate::config::Config;
use crate::error::handlers::NetworkErrorHandler;
use crate::error::{PackageError, Result};
use crate::logging::Logger;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Request, Response, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_wait: Duration::from_millis(200),
            max_wait: Duration::from_secs(3),
            factor: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let wait = self.min_wait.mul_f64(self.factor.powi(attempt as i32));
        wait.min(self.max_wait)
    }

    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
    }

    pub fn is_retryable_error(error: &reqwest::Error) -> bool {
        error.is_connect() || error.is_timeout() || error.is_request()
    }

    fn retry_after(&self, response: &Response) -> Option<Duration> {
        response
            .headers()
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(|secs| Duration::from_secs(secs).min(self.max_wait))
    }
}

/// Base HTTP client; every request goes through [`RetryClient::send`]
#[derive(Debug, Clone)]
pub struct RetryClient {
    client: Client,
    policy: RetryPolicy,
    logger: Logger,
}

impl RetryClient {
    pub fn new(config: &Config, logger: Logger) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.skip_tls)
            .user_agent(concat!("package-oci/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PackageError::Transfer(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            policy: config.retry.clone(),
            logger,
        })
    }

    /// The underlying client, for building requests
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Send a request, replaying it on transient failures
    ///
    /// The request body must be in memory so it can be cloned per attempt.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let current = request.try_clone().ok_or_else(|| {
                PackageError::Transfer("request body cannot be replayed".to_string())
            })?;
            let method = current.method().clone();
            let url = current.url().clone();

            match self.client.execute(current).await {
                Ok(response) => {
                    let status = response.status();
                    if !RetryPolicy::is_retryable_status(status) || attempt >= self.policy.max_retries {
                        return Ok(response);
                    }
                    let wait = self
                        .policy
                        .retry_after(&response)
                        .unwrap_or_else(|| self.policy.backoff(attempt));
                    self.logger.detail(&format!(
                        "{} {} returned {}, retrying in {}ms ({}/{})",
                        method,
                        url,
                        status,
                        wait.as_millis(),
                        attempt + 1,
                        self.policy.max_retries
                    ));
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    if !RetryPolicy::is_retryable_error(&e) || attempt >= self.policy.max_retries {
                        return Err(NetworkErrorHandler::handle_network_error(
                            &e,
                            &format!("{} {}", method, url),
                        ));
                    }
                    let wait = self.policy.backoff(attempt);
                    self.logger.detail(&format!(
                        "{} {} failed: {}, retrying in {}ms ({}/{})",
                        method,
                        url,
                        e,
                        wait.as_millis(),
                        attempt + 1,
                        self.policy.max_retries
                    ));
                    tokio::time::sleep(wait).await;
                }
            }
            attempt += 1;
        }
    }
}
