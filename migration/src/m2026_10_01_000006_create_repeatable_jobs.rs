//! Migration to create the repeatable_jobs table (cron registrations).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RepeatableJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RepeatableJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RepeatableJobs::RepeatKey).text().not_null())
                    .col(ColumnDef::new(RepeatableJobs::Name).text().not_null())
                    .col(ColumnDef::new(RepeatableJobs::DistrictId).uuid().not_null())
                    .col(ColumnDef::new(RepeatableJobs::Payload).json_binary().not_null())
                    .col(ColumnDef::new(RepeatableJobs::Cron).text().not_null())
                    .col(
                        ColumnDef::new(RepeatableJobs::Priority)
                            .small_integer()
                            .not_null()
                            .default(5),
                    )
                    .col(
                        ColumnDef::new(RepeatableJobs::NextRunAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RepeatableJobs::LastEnqueuedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RepeatableJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RepeatableJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_repeatable_jobs_district_id")
                            .from(RepeatableJobs::Table, RepeatableJobs::DistrictId)
                            .to(Districts::Table, Districts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_repeatable_jobs_repeat_key")
                    .table(RepeatableJobs::Table)
                    .col(RepeatableJobs::RepeatKey)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RepeatableJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RepeatableJobs {
    Table,
    Id,
    RepeatKey,
    Name,
    DistrictId,
    Payload,
    Cron,
    Priority,
    NextRunAt,
    LastEnqueuedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Districts {
    Table,
    Id,
}
