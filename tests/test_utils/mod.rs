//! Test utilities for database and vendor testing.
//!
//! Sets up in-memory SQLite databases with migrations applied, seeds
//! districts, and builds configuration tuned for fast wiremock-backed runs.

#![allow(dead_code)]

use anyhow::Result;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use serde_json::{Value, json};
use sis_sync::config::{AppConfig, VendorClientConfig, WorkerConfig};
use sis_sync::models::district;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// Every pooled connection would get its own empty in-memory database, so the
/// pool is pinned to one connection.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Vendor client settings with millisecond backoff so retries stay fast.
pub fn fast_client_config() -> VendorClientConfig {
    VendorClientConfig {
        http_timeout_secs: 5,
        max_retries: 3,
        retry_base_ms: 5,
        retry_factor: 2.0,
        retry_max_ms: 20,
        retry_jitter_factor: 0.0,
        ..VendorClientConfig::default()
    }
}

/// Test configuration with the queue disabled so syncs run inline.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        operator_tokens: vec!["test-token".to_string()],
        client: fast_client_config(),
        worker: WorkerConfig {
            enabled: false,
            queue_backoff_ms: 10,
            ..WorkerConfig::default()
        },
        ..AppConfig::default()
    }
}

/// PowerSchool OAuth2 credentials pointing at `base_url`.
pub fn powerschool_settings(base_url: &str) -> Value {
    json!({
        "sisCredentials": {
            "vendor": "powerschool",
            "baseUrl": base_url,
            "authType": "oauth2",
            "clientId": "client-id",
            "clientSecret": "client-secret"
        }
    })
}

/// Inserts a district with the given settings and feature flags.
pub async fn insert_district(
    db: &DatabaseConnection,
    settings: Value,
    feature_flags: Value,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now().fixed_offset();
    district::ActiveModel {
        id: Set(id),
        name: Set("Springfield Unified".to_string()),
        settings: Set(settings),
        feature_flags: Set(feature_flags),
        sync_lease_owner: Set(None),
        sync_lease_expires_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;
    Ok(id)
}
