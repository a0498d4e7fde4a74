//! # Sync API Handlers
//!
//! Trigger a district sync and list past runs recorded in the audit log.

use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::models::audit_log;
use crate::repositories::audit_log as audit_repo;
use crate::server::AppState;
use crate::sync_orchestrator::{ScheduleOutcome, SyncType};

const DEFAULT_LIST_LIMIT: u64 = 20;
const MAX_LIST_LIMIT: u64 = 100;

/// Request body for triggering a sync
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSyncRequest {
    pub sync_type: SyncType,
}

/// Returned when the sync was handed to the work queue
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnqueuedResponse {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListSyncsQuery {
    /// Maximum number of runs to return (default: 20, max: 100)
    pub limit: Option<u64>,
}

/// One past sync run
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunInfo {
    pub id: Uuid,
    pub district_id: Uuid,
    #[schema(example = "powerschool")]
    pub vendor: Option<String>,
    #[schema(example = "full")]
    pub sync_type: Option<String>,
    #[schema(value_type = Object)]
    pub stats: Value,
    #[schema(value_type = Vec<Object>)]
    pub errors: Value,
    pub created_at: DateTime<Utc>,
}

impl From<audit_log::Model> for SyncRunInfo {
    fn from(model: audit_log::Model) -> Self {
        let field = |name: &str| {
            model
                .metadata
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            id: model.id,
            district_id: model.district_id,
            vendor: field("vendor"),
            sync_type: field("syncType"),
            stats: model.metadata.get("stats").cloned().unwrap_or(Value::Null),
            errors: model
                .metadata
                .get("errors")
                .cloned()
                .unwrap_or_else(|| json!([])),
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncRunsResponse {
    pub runs: Vec<SyncRunInfo>,
}

fn parse_district_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        validation_error(
            "Invalid district id",
            json!({ "district_id": "must be a UUID" }),
        )
    })
}

/// Triggers a full or incremental sync for a district
#[utoipa::path(
    post,
    path = "/districts/{district_id}/syncs",
    security(("bearer_auth" = [])),
    params(("district_id" = Uuid, Path, description = "District to sync")),
    request_body = TriggerSyncRequest,
    responses(
        (status = 202, description = "Sync enqueued", body = SyncEnqueuedResponse),
        (status = 200, description = "Sync ran inline", body = crate::connectors::SyncResult),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "District not found", body = ApiError),
        (status = 409, description = "Sync already in progress", body = ApiError),
        (status = 422, description = "District has no usable SIS configuration", body = ApiError)
    ),
    tag = "syncs"
)]
pub async fn trigger_sync(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(district_id): Path<String>,
    payload: Result<Json<TriggerSyncRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let district_id = parse_district_id(&district_id)?;
    let Json(request) = payload?;

    let outcome = state
        .orchestrator
        .schedule_sync(district_id, request.sync_type)
        .await?;

    Ok(match outcome {
        ScheduleOutcome::Enqueued { job_id } => {
            tracing::info!(%district_id, %job_id, sync_type = %request.sync_type, "Sync enqueued");
            (StatusCode::ACCEPTED, Json(SyncEnqueuedResponse { job_id })).into_response()
        }
        ScheduleOutcome::Executed(result) => (StatusCode::OK, Json(result)).into_response(),
    })
}

/// Lists past sync runs for a district, newest first
#[utoipa::path(
    get,
    path = "/districts/{district_id}/syncs",
    security(("bearer_auth" = [])),
    params(("district_id" = Uuid, Path, description = "District"), ListSyncsQuery),
    responses(
        (status = 200, description = "Past sync runs", body = SyncRunsResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "syncs"
)]
pub async fn list_syncs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(district_id): Path<String>,
    Query(query): Query<ListSyncsQuery>,
) -> Result<Json<SyncRunsResponse>, ApiError> {
    let district_id = parse_district_id(&district_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(validation_error(
            "limit must be between 1 and 100",
            json!({ "limit": limit }),
        ));
    }

    let runs = audit_repo::list_sync_runs(&state.db, district_id, limit).await?;

    Ok(Json(SyncRunsResponse {
        runs: runs.into_iter().map(SyncRunInfo::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_info_reads_audit_metadata() {
        let model = audit_log::Model {
            id: Uuid::new_v4(),
            district_id: Uuid::new_v4(),
            action: audit_log::ACTION_BULK_OPERATION.to_string(),
            entity_type: audit_log::ENTITY_SIS_SYNC.to_string(),
            metadata: json!({
                "vendor": "powerschool",
                "syncType": "incremental",
                "stats": {"students": 3},
            }),
            created_at: Utc::now().fixed_offset(),
        };

        let info = SyncRunInfo::from(model);
        assert_eq!(info.vendor.as_deref(), Some("powerschool"));
        assert_eq!(info.sync_type.as_deref(), Some("incremental"));
        assert_eq!(info.stats["students"], 3);
        assert_eq!(info.errors, json!([]));
    }

    #[test]
    fn district_id_must_be_uuid() {
        let err = parse_district_id("district-1").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(&*err.code, "VALIDATION_FAILED");
    }
}
