//! # Data Models
//!
//! SeaORM entities for the directory graph and the work queue, plus small
//! API response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod audit_log;
pub mod district;
pub mod repeatable_job;
pub mod sync_job;
pub mod user;
pub mod user_relationship;

pub use audit_log::Entity as AuditLog;
pub use district::Entity as District;
pub use repeatable_job::Entity as RepeatableJob;
pub use sync_job::Entity as SyncJob;
pub use user::Entity as User;
pub use user_relationship::Entity as UserRelationship;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "sis-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
