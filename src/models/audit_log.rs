//! AuditLog entity model (append-only)

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

/// Action recorded for bulk directory writes such as a SIS sync run.
pub const ACTION_BULK_OPERATION: &str = "BULK_OPERATION";

/// Entity type recorded for SIS sync runs.
pub const ENTITY_SIS_SYNC: &str = "SIS_SYNC";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "audit_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub district_id: Uuid,

    pub action: String,

    pub entity_type: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: JsonValue,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
