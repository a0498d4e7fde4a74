//! User entity model
//!
//! Tenant-scoped directory users. SIS-sourced users are keyed within a
//! district by `(sis_id, role)`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub district_id: Uuid,

    /// Vendor identifier of the record this user was synced from
    pub sis_id: Option<String>,

    /// Directory role (`student`, `guardian`)
    pub role: String,

    pub first_name: String,

    pub last_name: String,

    pub middle_name: Option<String>,

    pub email: Option<String>,

    pub phone: Option<String>,

    pub grade: Option<String>,

    pub school_id: Option<String>,

    /// `active` or `inactive`
    pub status: String,

    /// Merged, never replaced, across syncs
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: JsonValue,

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
