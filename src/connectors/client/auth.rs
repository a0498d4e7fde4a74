//! Vendor authentication schemes and the OAuth2 token cache.

use std::time::Duration;

use reqwest::RequestBuilder;
use reqwest::header::HeaderName;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::connectors::credentials::{AuthType, SisCredentials};
use crate::connectors::error::ConnectorError;
use crate::connectors::registry::SisVendor;

/// OAuth token response (client-credentials grant).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    /// `None` when the vendor did not say; such tokens are only replaced after a 401
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, leeway: Duration) -> bool {
        self.expires_at
            .is_none_or(|expires_at| Instant::now() + leeway < expires_at)
    }
}

/// Client-credentials token source.
///
/// The cache mutex is held across the token request, so concurrent callers
/// that find a stale token wait for the single in-flight refresh.
pub struct OAuthTokenSource {
    vendor: SisVendor,
    token_url: Url,
    client_id: String,
    client_secret: String,
    leeway: Duration,
    cache: Mutex<Option<CachedToken>>,
}

impl OAuthTokenSource {
    pub fn new(
        vendor: SisVendor,
        token_url: Url,
        client_id: String,
        client_secret: String,
        leeway: Duration,
    ) -> Self {
        Self {
            vendor,
            token_url,
            client_id,
            client_secret,
            leeway,
            cache: Mutex::new(None),
        }
    }

    /// A token valid for at least the refresh leeway, fetching one if needed.
    pub async fn token(&self, http: &reqwest::Client) -> Result<String, ConnectorError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref().filter(|t| t.is_fresh(self.leeway)) {
            return Ok(cached.access_token.clone());
        }

        let fresh = self.request_token(http).await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    /// Replaces a token the vendor rejected with 401.
    ///
    /// When another caller already swapped the rejected token out, that newer
    /// token is reused instead of requesting a second one.
    pub async fn refresh_rejected(
        &self,
        http: &reqwest::Client,
        rejected: Option<&str>,
    ) -> Result<String, ConnectorError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Some(cached.access_token.as_str()) != rejected && cached.is_fresh(self.leeway) {
                return Ok(cached.access_token.clone());
            }
        }

        *cache = None;
        let fresh = self.request_token(http).await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    async fn request_token(&self, http: &reqwest::Client) -> Result<CachedToken, ConnectorError> {
        debug!(vendor = self.vendor.as_str(), url = %self.token_url, "requesting access token");

        let started = Instant::now();
        let response = http
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|err| {
                self.count_request("error");
                ConnectorError::Network {
                    vendor: self.vendor.to_string(),
                    details: format!("token request failed: {err}"),
                    timeout: err.is_timeout(),
                }
            })?;

        let status = response.status();
        debug!(
            vendor = self.vendor.as_str(),
            method = "POST",
            path = self.token_url.path(),
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "vendor request"
        );
        self.count_request(if status.is_success() { "token" } else { "token_rejected" });
        if !status.is_success() {
            let body = response.text().await.ok().filter(|b| !b.is_empty());
            warn!(
                vendor = self.vendor.as_str(),
                status = status.as_u16(),
                "token request rejected"
            );
            return Err(ConnectorError::Authentication {
                vendor: self.vendor.to_string(),
                status: Some(status.as_u16()),
                body,
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|err| ConnectorError::Authentication {
                    vendor: self.vendor.to_string(),
                    status: Some(status.as_u16()),
                    body: Some(format!("unreadable token response: {err}")),
                })?;

        debug!(
            vendor = self.vendor.as_str(),
            expires_in = token.expires_in,
            token_type = token.token_type.as_deref().unwrap_or("bearer"),
            "access token acquired"
        );

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })
    }

    fn count_request(&self, outcome: &'static str) {
        metrics::counter!(
            "sis_vendor_requests_total",
            "vendor" => self.vendor.as_str(),
            "outcome" => outcome
        )
        .increment(1);
    }
}

pub enum AuthScheme {
    OAuth2(OAuthTokenSource),
    ApiKey { header: HeaderName, key: String },
    Basic { username: String, password: String },
}

impl AuthScheme {
    pub fn from_credentials(
        vendor: SisVendor,
        credentials: &SisCredentials,
        base_url: &Url,
        leeway: Duration,
    ) -> Result<Self, ConnectorError> {
        credentials.validate()?;
        let client_id = credentials.client_id.clone().unwrap_or_default();
        let client_secret = credentials.client_secret.clone().unwrap_or_default();

        match credentials.auth_type {
            AuthType::OAuth2 => {
                let token_url = match credentials.token_url.as_deref() {
                    Some(raw) => Url::parse(raw),
                    None => base_url.join(vendor.token_path()),
                }
                .map_err(|err| {
                    ConnectorError::Configuration(format!("invalid token URL: {err}"))
                })?;
                Ok(Self::OAuth2(OAuthTokenSource::new(
                    vendor,
                    token_url,
                    client_id,
                    client_secret,
                    leeway,
                )))
            }
            AuthType::ApiKey => {
                let header_name = credentials
                    .api_key_header
                    .as_deref()
                    .unwrap_or(vendor.api_key_header());
                let header = HeaderName::from_bytes(header_name.as_bytes()).map_err(|err| {
                    ConnectorError::Configuration(format!(
                        "invalid API key header '{header_name}': {err}"
                    ))
                })?;
                Ok(Self::ApiKey {
                    header,
                    key: client_secret,
                })
            }
            AuthType::Basic => Ok(Self::Basic {
                username: client_id,
                password: client_secret,
            }),
        }
    }

    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuth2(_))
    }

    /// Attaches credentials; returns the bearer token used, if any.
    pub async fn apply(
        &self,
        request: RequestBuilder,
        http: &reqwest::Client,
    ) -> Result<(RequestBuilder, Option<String>), ConnectorError> {
        match self {
            Self::OAuth2(source) => {
                let token = source.token(http).await?;
                Ok((request.bearer_auth(&token), Some(token)))
            }
            Self::ApiKey { header, key } => Ok((request.header(header.clone(), key), None)),
            Self::Basic { username, password } => {
                Ok((request.basic_auth(username, Some(password)), None))
            }
        }
    }
}
