//! Vendor-neutral records produced by the vendor mappers.
//!
//! Every record carries the vendor's identifier as `external_id` and keeps the
//! untouched source payload under `metadata.raw`, so later re-mapping never
//! needs another fetch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Wraps an untouched vendor payload into the metadata bag stored on raw records.
pub fn raw_metadata(payload: &Value) -> Value {
    json!({ "raw": payload })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Inactive,
    Withdrawn,
    Graduated,
    PreRegistered,
}

impl EnrollmentStatus {
    /// First-letter heuristic over vendor status codes.
    ///
    /// `A` active, `W` withdrawn, `I` inactive, `G` graduated, `P` pre-registered;
    /// anything else (including an empty code) is treated as active. Vendors may
    /// reuse a prefix for a different meaning; the table is applied as-is.
    pub fn from_code(code: &str) -> Self {
        match code.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('W') => Self::Withdrawn,
            Some('I') => Self::Inactive,
            Some('G') => Self::Graduated,
            Some('P') => Self::PreRegistered,
            _ => Self::Active,
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, Self::Active | Self::PreRegistered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Tardy,
    Excused,
}

impl AttendanceStatus {
    /// First-letter heuristic: `T` tardy, `E` excused, `A`/`U` absent, default present.
    pub fn from_code(code: &str) -> Self {
        match code.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('T') => Self::Tardy,
            Some('E') => Self::Excused,
            Some('A') | Some('U') => Self::Absent,
            _ => Self::Present,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSchool {
    pub external_id: String,
    pub name: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStudent {
    pub external_id: String,
    pub local_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub grade: Option<String>,
    pub school_id: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGuardian {
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    /// Vendor relationship label, e.g. "Mother" or "Legal Guardian"
    pub relationship: Option<String>,
    pub is_primary: bool,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEnrollment {
    pub external_id: String,
    pub student_id: String,
    pub school_id: Option<String>,
    pub grade: Option<String>,
    pub status: EnrollmentStatus,
    pub entry_date: Option<NaiveDate>,
    pub exit_date: Option<NaiveDate>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGrade {
    pub external_id: String,
    pub student_id: String,
    pub section_id: Option<String>,
    pub term: Option<String>,
    pub letter_grade: Option<String>,
    pub percent: Option<f64>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttendance {
    pub external_id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    /// Vendor code the status was derived from
    pub code: String,
    pub section_id: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClassSection {
    pub external_id: String,
    pub course_name: String,
    pub course_code: Option<String>,
    pub teacher_id: Option<String>,
    pub period: Option<String>,
    pub term: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAssignment {
    pub external_id: String,
    pub section_id: String,
    pub title: String,
    pub due_date: Option<NaiveDate>,
    pub points_possible: Option<f64>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContact {
    pub external_id: String,
    pub student_id: String,
    pub name: String,
    pub relationship: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Call order; lower is contacted first
    pub priority: Option<u32>,
    pub metadata: Value,
}

/// Students enrolled in one class section. `external_id` is the section id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRoster {
    pub external_id: String,
    pub student_ids: Vec<String>,
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attendance_codes_follow_first_letter() {
        assert_eq!(AttendanceStatus::from_code("T"), AttendanceStatus::Tardy);
        assert_eq!(AttendanceStatus::from_code("tardy-bus"), AttendanceStatus::Tardy);
        assert_eq!(AttendanceStatus::from_code("EX"), AttendanceStatus::Excused);
        assert_eq!(AttendanceStatus::from_code("A"), AttendanceStatus::Absent);
        assert_eq!(AttendanceStatus::from_code("UNX"), AttendanceStatus::Absent);
        assert_eq!(AttendanceStatus::from_code("P"), AttendanceStatus::Present);
        assert_eq!(AttendanceStatus::from_code(""), AttendanceStatus::Present);
    }

    #[test]
    fn enrollment_codes_follow_first_letter() {
        assert_eq!(EnrollmentStatus::from_code("Active"), EnrollmentStatus::Active);
        assert_eq!(EnrollmentStatus::from_code("W1"), EnrollmentStatus::Withdrawn);
        assert_eq!(EnrollmentStatus::from_code("graduated"), EnrollmentStatus::Graduated);
        assert_eq!(EnrollmentStatus::from_code("P"), EnrollmentStatus::PreRegistered);
        assert_eq!(EnrollmentStatus::from_code("I"), EnrollmentStatus::Inactive);
        assert_eq!(EnrollmentStatus::from_code("?"), EnrollmentStatus::Active);
    }

    #[test]
    fn metadata_keeps_payload_untouched() {
        let payload = json!({"StudentID": 42, "Extra": {"nested": true}});
        assert_eq!(raw_metadata(&payload)["raw"], payload);
    }
}
