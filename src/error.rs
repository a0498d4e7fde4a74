//! # Error Handling
//!
//! Unified error handling for the operator API, implementing a consistent
//! problem+json response format with trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::connectors::ConnectorError;
use crate::queue::QueueError;
use crate::sync_orchestrator::SyncJobError;
use crate::telemetry;

/// Longest upstream body echoed back to operators.
const BODY_SNIPPET_CHARS: usize = 200;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Trace ID of the current request, or a generated correlation ID
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .is_some_and(|code| code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
}

/// Upstream SIS vendor error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VendorError {
    /// Vendor identifier (e.g., "powerschool", "infinite_campus")
    pub vendor: String,
    /// HTTP status code from upstream, when one was received
    pub status: Option<u16>,
    /// Response body snippet from upstream (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

// Error mappers for common sources

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::Database(db_err) => db_err.into(),
            other => {
                tracing::error!("Queue error: {}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Failed to enqueue sync",
                )
            }
        }
    }
}

impl From<ConnectorError> for ApiError {
    fn from(error: ConnectorError) -> Self {
        match error {
            ConnectorError::Http {
                vendor,
                status,
                body,
            } => vendor_error(vendor, Some(status), body),
            ConnectorError::Authentication {
                vendor,
                status,
                body,
            } => {
                let mut api_error = vendor_error(vendor, status, body);
                api_error.code = "VENDOR_AUTH_FAILED".into();
                api_error
            }
            ConnectorError::CircuitOpen { vendor, retry_in } => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "VENDOR_UNAVAILABLE",
                &format!("{} circuit breaker is open", vendor),
            )
            .with_retry_after(retry_in.as_secs().max(1)),
            ConnectorError::Network { vendor, details, .. }
            | ConnectorError::MalformedResponse { vendor, details } => Self::new(
                StatusCode::BAD_GATEWAY,
                "VENDOR_ERROR",
                &format!("{}: {}", vendor, details),
            ),
            ConnectorError::Mapping(err) => Self::new(
                StatusCode::BAD_GATEWAY,
                "VENDOR_ERROR",
                &err.to_string(),
            ),
            ConnectorError::Configuration(message) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "SIS_NOT_CONFIGURED",
                &message,
            ),
            ConnectorError::UnsupportedVendor(vendor) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNSUPPORTED_VENDOR",
                &format!("Unsupported SIS vendor '{}'", vendor),
            ),
        }
    }
}

impl From<SyncJobError> for ApiError {
    fn from(error: SyncJobError) -> Self {
        match error {
            SyncJobError::DistrictNotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("District {} not found", id),
            ),
            err @ (SyncJobError::MissingCredentials(_) | SyncJobError::InvalidCredentials { .. }) => {
                Self::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "SIS_NOT_CONFIGURED",
                    &err.to_string(),
                )
            }
            SyncJobError::Connector(err) => err.into(),
            SyncJobError::LeaseHeld(id) => Self::new(
                StatusCode::CONFLICT,
                "SYNC_IN_PROGRESS",
                &format!("District {} is already being synced", id),
            ),
            SyncJobError::Database(err) => err.into(),
            SyncJobError::Queue(err) => err.into(),
        }
    }
}

/// Create a vendor upstream error (502)
pub fn vendor_error(vendor: String, status: Option<u16>, body: Option<String>) -> ApiError {
    let details = VendorError {
        vendor: vendor.clone(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > BODY_SNIPPET_CHARS {
                let truncated: String = b.chars().take(BODY_SNIPPET_CHARS).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    let message = match status {
        Some(status) => format!("SIS vendor {} returned error status {}", vendor, status),
        None => format!("SIS vendor {} request failed", vendor),
    };
    ApiError::new(StatusCode::BAD_GATEWAY, "VENDOR_ERROR", &message).with_details(json!(details))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let mut error = unauthorized(message);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_api_error_with_details() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Test error message")
            .with_details(json!({"field": "value"}));

        assert_eq!(error.details, Some(Box::new(json!({"field": "value"}))));
        assert!(error.trace_id.is_some());
    }

    #[test]
    fn test_from_anyhow() {
        let api_error: ApiError = anyhow::anyhow!("Something went wrong").into();

        assert_eq!(api_error.code, Box::from("INTERNAL_SERVER_ERROR"));
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn test_vendor_error_truncates_body() {
        let error = vendor_error("powerschool".to_string(), Some(500), Some("x".repeat(500)));

        assert_eq!(error.status, StatusCode::BAD_GATEWAY);
        assert_eq!(error.code, Box::from("VENDOR_ERROR"));
        let details = error.details.expect("details");
        assert_eq!(details["vendor"], "powerschool");
        assert_eq!(details["status"], 500);
        assert_eq!(
            details["body_snippet"].as_str().unwrap().len(),
            BODY_SNIPPET_CHARS + 3
        );
    }

    #[test]
    fn test_sync_job_errors_map_to_statuses() {
        let id = Uuid::new_v4();
        let missing: ApiError = SyncJobError::MissingCredentials(id).into();
        assert_eq!(missing.status, StatusCode::UNPROCESSABLE_ENTITY);

        let held: ApiError = SyncJobError::LeaseHeld(id).into();
        assert_eq!(held.status, StatusCode::CONFLICT);
        assert_eq!(held.code, Box::from("SYNC_IN_PROGRESS"));

        let open: ApiError = SyncJobError::Connector(ConnectorError::CircuitOpen {
            vendor: "infinite_campus".into(),
            retry_in: Duration::from_millis(1500),
        })
        .into();
        assert_eq!(open.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(open.retry_after, Some(1));

        let unsupported: ApiError =
            SyncJobError::Connector(ConnectorError::UnsupportedVendor("skyward".into())).into();
        assert_eq!(unsupported.code, Box::from("UNSUPPORTED_VENDOR"));
    }

    #[tokio::test]
    async fn test_into_response_is_problem_json() {
        let response = ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", "down")
            .with_retry_after(30)
            .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
        assert_eq!(response.headers().get("retry-after").unwrap(), "30");
    }
}
