//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! directory graph, districts and audit records.

pub mod audit_log;
pub mod directory;
pub mod district;

pub use directory::UpsertOutcome;
pub use district::DistrictRepository;
