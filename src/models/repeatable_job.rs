//! RepeatableJob entity model
//!
//! Cron registrations that the scheduler promotes into `sync_jobs` rows.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "repeatable_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// SHA-256 of job name, cron expression and payload options
    pub repeat_key: String,

    pub name: String,

    pub district_id: Uuid,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    pub cron: String,

    pub priority: i16,

    pub next_run_at: DateTimeWithTimeZone,

    pub last_enqueued_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
