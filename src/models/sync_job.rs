//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table,
//! the durable work queue consumed by the sync worker.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Queued unit of work: one SIS sync for one district
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Queue job name (e.g. `sis-sync`, `sis-incremental-sync`)
    pub name: String,

    /// District this job syncs
    pub district_id: Uuid,

    /// `full` or `incremental`
    pub sync_type: String,

    /// Serialized [`crate::sync_orchestrator::SyncJob`]
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// Current status (`queued`, `running`, `succeeded`, `failed`)
    pub status: String,

    /// Job priority; lower values run first (full = 1, incremental = 5)
    pub priority: i16,

    /// Number of attempts made for this job
    pub attempts: i32,

    /// Attempts allowed before the job is marked failed
    pub max_attempts: i32,

    /// Base delay for queue-level exponential backoff
    pub backoff_ms: i64,

    /// Repeat key of the cron registration that produced this job, if any
    pub repeat_key: Option<String>,

    /// Timestamp when the job is scheduled to run
    pub scheduled_at: DateTimeWithTimeZone,

    /// Timestamp when the job becomes eligible for retry after backoff
    pub retry_after: Option<DateTimeWithTimeZone>,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Serialized sync result on success
    #[sea_orm(column_type = "JsonBinary")]
    pub result: Option<JsonValue>,

    /// Structured error details if the last attempt failed
    #[sea_orm(column_type = "JsonBinary")]
    pub error: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::district::Entity",
        from = "Column::DistrictId",
        to = "super::district::Column::Id"
    )]
    District,
}

impl Related<super::district::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::District.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
