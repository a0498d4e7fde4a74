//! # AuditLog Repository
//!
//! Append-only audit records. A SIS sync run is recorded as one
//! `BULK_OPERATION` / `SIS_SYNC` entry.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::json;
use uuid::Uuid;

use crate::connectors::{SisVendor, SyncResult};
use crate::models::audit_log::{
    self, ACTION_BULK_OPERATION, ENTITY_SIS_SYNC, Entity as AuditLog, Model,
};

/// Appends the audit entry for a finished sync run.
pub async fn record_sync<C: ConnectionTrait>(
    conn: &C,
    district_id: Uuid,
    vendor: SisVendor,
    sync_type: &str,
    result: &SyncResult,
) -> Result<Model, DbErr> {
    let entry = audit_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        district_id: Set(district_id),
        action: Set(ACTION_BULK_OPERATION.to_string()),
        entity_type: Set(ENTITY_SIS_SYNC.to_string()),
        metadata: Set(json!({
            "vendor": vendor.as_str(),
            "syncType": sync_type,
            "stats": result.stats,
            "errors": result.errors,
        })),
        created_at: Set(Utc::now().fixed_offset()),
    };
    entry.insert(conn).await.inspect_err(|e| {
        tracing::error!(district_id = %district_id, "Failed to write sync audit entry: {}", e);
    })
}

/// Most recent sync runs for a district, newest first.
pub async fn list_sync_runs<C: ConnectionTrait>(
    conn: &C,
    district_id: Uuid,
    limit: u64,
) -> Result<Vec<Model>, DbErr> {
    AuditLog::find()
        .filter(audit_log::Column::DistrictId.eq(district_id))
        .filter(audit_log::Column::Action.eq(ACTION_BULK_OPERATION))
        .filter(audit_log::Column::EntityType.eq(ENTITY_SIS_SYNC))
        .order_by_desc(audit_log::Column::CreatedAt)
        .limit(limit)
        .all(conn)
        .await
}
