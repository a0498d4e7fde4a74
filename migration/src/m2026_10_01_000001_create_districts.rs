//! Migration to create the districts table.
//!
//! A district is the tenant boundary. Its JSON `settings` hold SIS
//! credentials and sync policy; `feature_flags` hold the last-sync marker.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Districts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Districts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Districts::Name).text().not_null())
                    .col(ColumnDef::new(Districts::Settings).json_binary().not_null())
                    .col(
                        ColumnDef::new(Districts::FeatureFlags)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Districts::SyncLeaseOwner).uuid().null())
                    .col(
                        ColumnDef::new(Districts::SyncLeaseExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Districts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Districts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Districts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Districts {
    Table,
    Id,
    Name,
    Settings,
    FeatureFlags,
    SyncLeaseOwner,
    SyncLeaseExpiresAt,
    CreatedAt,
    UpdatedAt,
}
