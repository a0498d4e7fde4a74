//! District entity model
//!
//! A district is the tenant boundary for the directory graph. SIS credentials
//! and sync policy live in `settings`; the last-sync marker lives in
//! `feature_flags`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "districts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    /// District configuration (`sisCredentials`, `sisSchoolIds`, `sisPolicy`)
    #[sea_orm(column_type = "JsonBinary")]
    pub settings: JsonValue,

    /// Feature flags; `sis.lastSync` records the last completed sync start time
    #[sea_orm(column_type = "JsonBinary")]
    pub feature_flags: JsonValue,

    /// Holder of the district sync lease, if any
    pub sync_lease_owner: Option<Uuid>,

    pub sync_lease_expires_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user::Entity")]
    Users,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
