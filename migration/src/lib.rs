//! Database migrations for the SIS sync service.
//!
//! Creates the directory tables the sync engine writes to, plus the work
//! queue tables used by the worker and scheduler.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000001_create_districts;
mod m2026_10_01_000002_create_users;
mod m2026_10_01_000003_create_user_relationships;
mod m2026_10_01_000004_create_audit_logs;
mod m2026_10_01_000005_create_sync_jobs;
mod m2026_10_01_000006_create_repeatable_jobs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000001_create_districts::Migration),
            Box::new(m2026_10_01_000002_create_users::Migration),
            Box::new(m2026_10_01_000003_create_user_relationships::Migration),
            Box::new(m2026_10_01_000004_create_audit_logs::Migration),
            Box::new(m2026_10_01_000005_create_sync_jobs::Migration),
            Box::new(m2026_10_01_000006_create_repeatable_jobs::Migration),
        ]
    }
}
