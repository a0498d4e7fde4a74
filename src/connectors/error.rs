//! Error types shared by vendor clients, mappers and connectors.

use std::time::Duration;

use thiserror::Error;

/// Statuses that are retried with backoff before surfacing as [`ConnectorError::Http`].
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Errors raised while talking to a SIS vendor.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    /// Upstream returned a non-success status (after any retries)
    #[error("{vendor} request failed with HTTP {status}: {}", body.as_deref().unwrap_or("no body"))]
    Http {
        vendor: String,
        status: u16,
        body: Option<String>,
    },

    /// Token acquisition failed or the vendor kept rejecting credentials
    #[error("{vendor} authentication failed{}: {}", status.map(|s| format!(" with HTTP {s}")).unwrap_or_default(), body.as_deref().unwrap_or("no body"))]
    Authentication {
        vendor: String,
        status: Option<u16>,
        body: Option<String>,
    },

    /// Circuit breaker is open; no request was sent
    #[error("{vendor} circuit breaker open; retry in {}ms", retry_in.as_millis())]
    CircuitOpen { vendor: String, retry_in: Duration },

    /// Timeout or connectivity failure
    #[error("network error talking to {vendor}: {details}")]
    Network {
        vendor: String,
        details: String,
        timeout: bool,
    },

    /// Response body could not be decoded
    #[error("malformed {vendor} response: {details}")]
    MalformedResponse { vendor: String, details: String },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// Credentials or client setup are unusable
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unsupported SIS vendor '{0}'")]
    UnsupportedVendor(String),
}

impl ConnectorError {
    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectorError::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
            ConnectorError::Authentication { status, .. } => {
                status.is_none_or(|s| s >= 500 || s == 429 || s == 408)
            }
            ConnectorError::CircuitOpen { .. } | ConnectorError::Network { .. } => true,
            ConnectorError::MalformedResponse { .. }
            | ConnectorError::Mapping(_)
            | ConnectorError::Configuration(_)
            | ConnectorError::UnsupportedVendor(_) => false,
        }
    }

    /// HTTP status associated with the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ConnectorError::Http { status, .. } => Some(*status),
            ConnectorError::Authentication { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// A vendor payload could not be mapped into a canonical record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("{vendor} {entity} record is missing required field '{field}'")]
    MissingField {
        vendor: String,
        entity: &'static str,
        field: &'static str,
    },

    #[error("{vendor} {entity} record has invalid '{field}': {value}")]
    InvalidField {
        vendor: String,
        entity: &'static str,
        field: &'static str,
        value: String,
    },
}

impl MappingError {
    pub fn missing(vendor: impl Into<String>, entity: &'static str, field: &'static str) -> Self {
        Self::MissingField {
            vendor: vendor.into(),
            entity,
            field,
        }
    }

    pub fn invalid(
        vendor: impl Into<String>,
        entity: &'static str,
        field: &'static str,
        value: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            vendor: vendor.into(),
            entity,
            field,
            value: value.into(),
        }
    }
}
