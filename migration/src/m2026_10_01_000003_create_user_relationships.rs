//! Migration to create the user_relationships table (typed directory edges).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserRelationships::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserRelationships::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserRelationships::DistrictId).uuid().not_null())
                    .col(ColumnDef::new(UserRelationships::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(UserRelationships::RelatedUserId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserRelationships::RelationshipType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserRelationships::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(UserRelationships::IsPrimary)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(UserRelationships::Metadata)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserRelationships::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UserRelationships::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_relationships_user_id")
                            .from(UserRelationships::Table, UserRelationships::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_relationships_related_user_id")
                            .from(UserRelationships::Table, UserRelationships::RelatedUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_user_relationships_edge")
                    .table(UserRelationships::Table)
                    .col(UserRelationships::UserId)
                    .col(UserRelationships::RelatedUserId)
                    .col(UserRelationships::RelationshipType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_relationships_district")
                    .table(UserRelationships::Table)
                    .col(UserRelationships::DistrictId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserRelationships::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserRelationships {
    Table,
    Id,
    DistrictId,
    UserId,
    RelatedUserId,
    RelationshipType,
    Status,
    IsPrimary,
    Metadata,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
