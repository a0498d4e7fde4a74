//! UserRelationship entity model
//!
//! Typed directory edges, unique per `(user_id, related_user_id, relationship_type)`.
//! For SIS-sourced edges `user_id` is the guardian and `related_user_id` the student.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_relationships")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub district_id: Uuid,

    pub user_id: Uuid,

    pub related_user_id: Uuid,

    /// `parent`, `guardian`, `emergency_contact` or `other`
    pub relationship_type: String,

    pub status: String,

    pub is_primary: bool,

    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: JsonValue,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::RelatedUserId",
        to = "super::user::Column::Id"
    )]
    RelatedUser,
}

impl ActiveModelBehavior for ActiveModel {}
