//! Connectors module
//!
//! This module provides the SIS integration layer including:
//! - The `SisConnector` trait every vendor connector implements
//! - The vendor HTTP client (auth, rate limiting, retry, circuit breaking)
//! - Vendor mappers producing vendor-neutral `Raw*` records
//! - The closed vendor registry and connector factory

pub mod client;
pub mod credentials;
pub mod error;
pub mod fields;
pub mod infinite_campus;
pub mod powerschool;
pub mod raw;
pub mod registry;
pub mod trait_;

pub use credentials::{AuthType, SisCredentials};
pub use error::{ConnectorError, MappingError};
pub use infinite_campus::InfiniteCampusConnector;
pub use powerschool::PowerSchoolConnector;
pub use raw::{
    AttendanceStatus, EnrollmentStatus, RawAssignment, RawAttendance, RawClassSection, RawContact,
    RawEnrollment, RawGrade, RawGuardian, RawRoster, RawSchool, RawStudent,
};
pub use registry::{ConnectorFactory, SisVendor};
pub use trait_::{
    ChangeOperation, ChangeRecord, EntityType, Listing, MappingFailure, SisConnector, StudentPage,
    SyncError, SyncHandler, SyncOptions, SyncProgress, SyncResult, SyncStats,
};
