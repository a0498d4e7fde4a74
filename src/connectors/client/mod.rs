//! Wire-level HTTP access to one SIS vendor.
//!
//! A [`VendorClient`] owns everything stateful about talking to a vendor:
//! the token cache, the request limiter and the circuit breaker. One client is
//! built per connector, so none of this state is shared between jobs.

pub mod auth;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

use std::sync::Mutex;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::VendorClientConfig;
use crate::connectors::credentials::SisCredentials;
use crate::connectors::error::ConnectorError;
use crate::connectors::registry::SisVendor;

pub use auth::AuthScheme;
pub use circuit_breaker::{Admission, BreakerState, CircuitBreaker};
pub use rate_limit::RequestLimiter;
pub use retry::RetryPolicy;

/// Error bodies are truncated to this many bytes before being attached to errors.
const MAX_ERROR_BODY: usize = 2048;

pub struct VendorClient {
    vendor: SisVendor,
    base_url: Url,
    http: reqwest::Client,
    auth: AuthScheme,
    limiter: RequestLimiter,
    breaker: Mutex<CircuitBreaker>,
    retry: RetryPolicy,
}

impl VendorClient {
    pub fn new(
        vendor: SisVendor,
        credentials: &SisCredentials,
        config: &VendorClientConfig,
    ) -> Result<Self, ConnectorError> {
        let base_url = credentials.base_url()?;
        let auth = AuthScheme::from_credentials(
            vendor,
            credentials,
            &base_url,
            config.token_refresh_leeway(),
        )?;
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("sis-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ConnectorError::Configuration(format!("HTTP client: {err}")))?;

        Ok(Self {
            vendor,
            base_url,
            http,
            auth,
            limiter: RequestLimiter::per_minute(
                vendor.as_str(),
                vendor.requests_per_minute(),
                config.max_in_flight,
            ),
            breaker: Mutex::new(CircuitBreaker::new(
                vendor.as_str(),
                config.breaker_failure_threshold,
                config.breaker_cooldown(),
            )),
            retry: RetryPolicy::from_config(config),
        })
    }

    pub fn vendor(&self) -> SisVendor {
        self.vendor
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.lock_breaker().state()
    }

    /// Obtains credentials up front. Only OAuth2 needs a round trip.
    pub async fn authenticate(&self) -> Result<(), ConnectorError> {
        if let AuthScheme::OAuth2(source) = &self.auth {
            source.token(&self.http).await?;
        }
        Ok(())
    }

    /// GETs `path` (relative to the base URL) and decodes the JSON body.
    #[instrument(skip(self, query), fields(vendor = self.vendor.as_str()))]
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ConnectorError> {
        let url = self.endpoint(path, query)?;

        if let Admission::Rejected { retry_in } = self.lock_breaker().admit() {
            debug!(path, "circuit open, request short-circuited");
            return Err(ConnectorError::CircuitOpen {
                vendor: self.vendor.to_string(),
                retry_in,
            });
        }

        let outcome = self.send_with_retries(path, url).await;

        let mut breaker = self.lock_breaker();
        match &outcome {
            Ok(_) => breaker.record_success(),
            Err(err) if err.is_retryable() => breaker.record_failure(),
            Err(_) => breaker.record_neutral(),
        }
        outcome
    }

    async fn send_with_retries(&self, path: &str, url: Url) -> Result<Value, ConnectorError> {
        let mut attempt: u32 = 0;
        let mut reauthenticated = false;

        loop {
            // A token fetch must not occupy a request slot
            let (request, bearer) = self.auth.apply(self.http.get(url.clone()), &self.http).await?;
            let permit = self.limiter.acquire().await.map_err(|err| {
                ConnectorError::Configuration(format!("request limiter closed: {err}"))
            })?;

            let started = Instant::now();
            let result = request.send().await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    let timeout = err.is_timeout();
                    self.count_request("error");
                    if attempt < self.retry.max_retries {
                        let delay = self.retry.backoff(attempt);
                        warn!(
                            method = "GET",
                            path,
                            latency_ms,
                            timeout,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "vendor request failed, retrying"
                        );
                        drop(permit);
                        self.pause(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ConnectorError::Network {
                        vendor: self.vendor.to_string(),
                        details: err.to_string(),
                        timeout,
                    });
                }
            };

            let status = response.status();
            debug!(method = "GET", path, status = status.as_u16(), latency_ms, "vendor request");
            self.count_request(status_class(status));

            if status.is_success() {
                let body = response.json::<Value>().await.map_err(|err| {
                    ConnectorError::MalformedResponse {
                        vendor: self.vendor.to_string(),
                        details: format!("{path}: {err}"),
                    }
                });
                drop(permit);
                return body;
            }

            if status == StatusCode::UNAUTHORIZED && self.auth.is_oauth() && !reauthenticated {
                reauthenticated = true;
                drop(permit);
                warn!(path, "vendor rejected access token, refreshing once");
                if let AuthScheme::OAuth2(source) = &self.auth {
                    source.refresh_rejected(&self.http, bearer.as_deref()).await?;
                }
                continue;
            }

            let headers = response.headers().clone();
            let body = response.text().await.ok().and_then(truncate_body);
            drop(permit);

            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                return Err(ConnectorError::Authentication {
                    vendor: self.vendor.to_string(),
                    status: Some(status.as_u16()),
                    body,
                });
            }

            if RetryPolicy::is_retryable_status(status.as_u16()) && attempt < self.retry.max_retries
            {
                let delay = self.retry.delay_for(attempt, Some(&headers));
                warn!(
                    path,
                    status = status.as_u16(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying vendor request"
                );
                self.pause(delay).await;
                attempt += 1;
                continue;
            }

            return Err(ConnectorError::Http {
                vendor: self.vendor.to_string(),
                status: status.as_u16(),
                body,
            });
        }
    }

    async fn pause(&self, delay: Duration) {
        metrics::counter!("sis_vendor_retries_total", "vendor" => self.vendor.as_str())
            .increment(1);
        sleep(delay).await;
    }

    fn count_request(&self, outcome: &'static str) {
        metrics::counter!(
            "sis_vendor_requests_total",
            "vendor" => self.vendor.as_str(),
            "outcome" => outcome
        )
        .increment(1);
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ConnectorError> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ConnectorError::Configuration(format!("invalid path '{path}': {err}")))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    fn lock_breaker(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        200..=299 => "2xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

fn truncate_body(body: String) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    if body.len() <= MAX_ERROR_BODY {
        return Some(body);
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    Some(format!("{}...", &body[..end]))
}
