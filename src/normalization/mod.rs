//! Directory graph normalization.
//!
//! Turns vendor-neutral `Raw*` records into the rows the directory stores:
//! users tagged with their role and vendor, and typed relationship edges.

use std::fmt;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use uuid::Uuid;

use crate::connectors::{RawEnrollment, RawGuardian, RawStudent, SisVendor};

/// Directory role of a SIS-sourced user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserRole {
    Student,
    Guardian,
}

impl UserRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Guardian => "guardian",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical relationship edge types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipType {
    Parent,
    Guardian,
    EmergencyContact,
    Other,
}

impl RelationshipType {
    pub const fn as_str(self) -> &'static str {
        match self {
            RelationshipType::Parent => "parent",
            RelationshipType::Guardian => "guardian",
            RelationshipType::EmergencyContact => "emergency_contact",
            RelationshipType::Other => "other",
        }
    }

    /// Maps free-text vendor labels ("Mother", "Legal Guardian", "Emergency Contact").
    pub fn from_label(label: Option<&str>) -> Self {
        let Some(label) = label else {
            return RelationshipType::Guardian;
        };
        let label = label.trim().to_ascii_lowercase();
        if label.contains("emergency") {
            RelationshipType::EmergencyContact
        } else if label.contains("guardian") {
            RelationshipType::Guardian
        } else if ["mother", "father", "parent", "stepmother", "stepfather"]
            .iter()
            .any(|p| label.contains(p))
        {
            RelationshipType::Parent
        } else {
            RelationshipType::Other
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// District policy read from `settings.sisPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DistrictSyncPolicy {
    pub lowercase_emails: bool,
    pub deactivate_withdrawn: bool,
}

impl Default for DistrictSyncPolicy {
    fn default() -> Self {
        Self {
            lowercase_emails: true,
            deactivate_withdrawn: true,
        }
    }
}

impl DistrictSyncPolicy {
    /// Missing or malformed policy falls back to the defaults.
    pub fn from_settings(settings: &Value) -> Self {
        settings
            .get("sisPolicy")
            .and_then(|policy| serde_json::from_value(policy.clone()).ok())
            .unwrap_or_default()
    }
}

/// Errors that can occur while normalizing raw records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("{entity} {id} has a blank {field}")]
    BlankField {
        entity: &'static str,
        id: String,
        field: &'static str,
    },
}

/// A user row ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedUser {
    pub district_id: Uuid,
    pub sis_id: String,
    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub grade: Option<String>,
    pub school_id: Option<String>,
    /// `None` leaves an existing user's status untouched
    pub status: Option<UserStatus>,
    pub metadata: Value,
}

/// Enrollment facts applied onto the student's user row.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEnrollment {
    pub district_id: Uuid,
    pub student_sis_id: String,
    pub external_id: String,
    /// Active or pre-registered
    pub current: bool,
    pub entry_date: Option<NaiveDate>,
    pub school_id: Option<String>,
    pub grade: Option<String>,
    pub status: Option<UserStatus>,
    /// Merged into the student's metadata
    pub metadata: Value,
}

/// A guardian -> student edge ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRelationship {
    pub district_id: Uuid,
    /// Guardian
    pub user_id: Uuid,
    /// Student
    pub related_user_id: Uuid,
    pub relationship_type: RelationshipType,
    pub is_primary: bool,
    pub status: UserStatus,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    policy: DistrictSyncPolicy,
}

impl Normalizer {
    pub fn new(policy: DistrictSyncPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DistrictSyncPolicy {
        self.policy
    }

    pub fn normalize_student(
        &self,
        vendor: SisVendor,
        raw: &RawStudent,
        district_id: Uuid,
    ) -> Result<NormalizedUser, NormalizationError> {
        let mut metadata = vendor_metadata(vendor, &raw.metadata);
        insert_present(&mut metadata, "sisLocalId", raw.local_id.clone().map(Value::from));
        insert_present(&mut metadata, "birthDate", raw.birth_date.map(|d| Value::from(d.to_string())));
        insert_present(&mut metadata, "gender", raw.gender.clone().map(Value::from));

        Ok(NormalizedUser {
            district_id,
            sis_id: raw.external_id.clone(),
            role: UserRole::Student,
            first_name: required_name("student", &raw.external_id, "first_name", &raw.first_name)?,
            last_name: required_name("student", &raw.external_id, "last_name", &raw.last_name)?,
            middle_name: trimmed(raw.middle_name.as_deref()),
            email: self.email(raw.email.as_deref()),
            phone: None,
            grade: raw.grade.as_deref().and_then(canonical_grade),
            school_id: trimmed(raw.school_id.as_deref()),
            status: None,
            metadata: Value::Object(metadata),
        })
    }

    pub fn normalize_guardian(
        &self,
        vendor: SisVendor,
        raw: &RawGuardian,
        district_id: Uuid,
    ) -> Result<NormalizedUser, NormalizationError> {
        let mut metadata = vendor_metadata(vendor, &raw.metadata);
        insert_present(&mut metadata, "sisRelationship", raw.relationship.clone().map(Value::from));

        Ok(NormalizedUser {
            district_id,
            sis_id: raw.external_id.clone(),
            role: UserRole::Guardian,
            first_name: required_name("guardian", &raw.external_id, "first_name", &raw.first_name)?,
            last_name: required_name("guardian", &raw.external_id, "last_name", &raw.last_name)?,
            middle_name: None,
            email: self.email(raw.email.as_deref()),
            phone: trimmed(raw.phone.as_deref()),
            grade: None,
            school_id: None,
            status: Some(UserStatus::Active),
            metadata: Value::Object(metadata),
        })
    }

    pub fn normalize_enrollment(
        &self,
        vendor: SisVendor,
        raw: &RawEnrollment,
        district_id: Uuid,
    ) -> Result<NormalizedEnrollment, NormalizationError> {
        let grade = raw.grade.as_deref().and_then(canonical_grade);
        let school_id = trimmed(raw.school_id.as_deref());
        let status = self.policy.deactivate_withdrawn.then(|| {
            if raw.status.is_current() {
                UserStatus::Active
            } else {
                UserStatus::Inactive
            }
        });

        let mut metadata = Map::new();
        metadata.insert("sisVendor".into(), Value::from(vendor.as_str()));
        metadata.insert(
            "enrollment".into(),
            json!({
                "externalId": raw.external_id,
                "schoolId": school_id,
                "grade": grade,
                "status": raw.status,
                "entryDate": raw.entry_date,
                "exitDate": raw.exit_date,
                "sisRaw": raw.metadata.get("raw").cloned().unwrap_or(Value::Null),
            }),
        );

        Ok(NormalizedEnrollment {
            district_id,
            student_sis_id: raw.student_id.clone(),
            external_id: raw.external_id.clone(),
            current: raw.status.is_current(),
            entry_date: raw.entry_date,
            school_id,
            grade,
            status,
            metadata: Value::Object(metadata),
        })
    }

    pub fn normalize_relationship(
        &self,
        vendor: SisVendor,
        raw: &RawGuardian,
        district_id: Uuid,
        student_user_id: Uuid,
        guardian_user_id: Uuid,
    ) -> NormalizedRelationship {
        NormalizedRelationship {
            district_id,
            user_id: guardian_user_id,
            related_user_id: student_user_id,
            relationship_type: RelationshipType::from_label(raw.relationship.as_deref()),
            is_primary: raw.is_primary,
            status: UserStatus::Active,
            metadata: json!({
                "sisVendor": vendor.as_str(),
                "sisRelationship": raw.relationship,
                "sisGuardianId": raw.external_id,
            }),
        }
    }

    fn email(&self, raw: Option<&str>) -> Option<String> {
        let email = trimmed(raw)?;
        if !email.contains('@') {
            return None;
        }
        Some(if self.policy.lowercase_emails {
            email.to_lowercase()
        } else {
            email
        })
    }
}

/// Canonical grade code: `K`, `PK`, or the grade number without zero padding.
pub fn canonical_grade(raw: &str) -> Option<String> {
    let grade = raw.trim().to_ascii_uppercase();
    if grade.is_empty() {
        return None;
    }
    if let Ok(number) = grade.parse::<i32>() {
        return Some(match number {
            0 => "K".to_string(),
            -1 => "PK".to_string(),
            n => n.to_string(),
        });
    }
    Some(match grade.as_str() {
        "KG" | "K" | "KN" => "K".to_string(),
        "PK" | "PREK" | "PRE-K" => "PK".to_string(),
        _ => grade,
    })
}

fn vendor_metadata(vendor: SisVendor, raw_metadata: &Value) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("sisVendor".into(), Value::from(vendor.as_str()));
    metadata.insert(
        "sisRaw".into(),
        raw_metadata.get("raw").cloned().unwrap_or(Value::Null),
    );
    metadata
}

fn insert_present(metadata: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        metadata.insert(key.to_string(), value);
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required_name(
    entity: &'static str,
    id: &str,
    field: &'static str,
    value: &str,
) -> Result<String, NormalizationError> {
    trimmed(Some(value)).ok_or_else(|| NormalizationError::BlankField {
        entity,
        id: id.to_string(),
        field,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::raw::{EnrollmentStatus, raw_metadata};

    fn raw_student() -> RawStudent {
        RawStudent {
            external_id: "42".into(),
            local_id: Some("9001".into()),
            first_name: "  Grace ".into(),
            last_name: "Hopper".into(),
            middle_name: Some(" ".into()),
            grade: Some("011".into()),
            school_id: Some("7".into()),
            email: Some(" Grace.Hopper@Example.ORG ".into()),
            birth_date: None,
            gender: None,
            metadata: raw_metadata(&json!({"StudentID": "42"})),
        }
    }

    fn raw_enrollment(status: EnrollmentStatus) -> RawEnrollment {
        RawEnrollment {
            external_id: "e1".into(),
            student_id: "42".into(),
            school_id: Some("7".into()),
            grade: Some("KG".into()),
            status,
            entry_date: None,
            exit_date: None,
            metadata: raw_metadata(&json!({"EnrollmentID": "e1"})),
        }
    }

    #[test]
    fn student_is_trimmed_tagged_and_lowercased() {
        let district = Uuid::new_v4();
        let user = Normalizer::default()
            .normalize_student(SisVendor::InfiniteCampus, &raw_student(), district)
            .unwrap();
        assert_eq!(user.first_name, "Grace");
        assert_eq!(user.middle_name, None);
        assert_eq!(user.email.as_deref(), Some("grace.hopper@example.org"));
        assert_eq!(user.grade.as_deref(), Some("11"));
        assert_eq!(user.role, UserRole::Student);
        assert_eq!(user.metadata["sisVendor"], "infinite_campus");
        assert_eq!(user.metadata["sisRaw"]["StudentID"], "42");
        assert_eq!(user.metadata["sisLocalId"], "9001");
    }

    #[test]
    fn email_case_is_kept_when_policy_disables_lowercasing() {
        let normalizer = Normalizer::new(DistrictSyncPolicy {
            lowercase_emails: false,
            ..Default::default()
        });
        let user = normalizer
            .normalize_student(SisVendor::PowerSchool, &raw_student(), Uuid::new_v4())
            .unwrap();
        assert_eq!(user.email.as_deref(), Some("Grace.Hopper@Example.ORG"));
    }

    #[test]
    fn blank_names_are_rejected() {
        let mut raw = raw_student();
        raw.last_name = "   ".into();
        let err = Normalizer::default()
            .normalize_student(SisVendor::PowerSchool, &raw, Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, NormalizationError::BlankField { field: "last_name", .. }));
    }

    #[test]
    fn grade_codes_are_canonicalized() {
        assert_eq!(canonical_grade("KG").as_deref(), Some("K"));
        assert_eq!(canonical_grade("0").as_deref(), Some("K"));
        assert_eq!(canonical_grade("-1").as_deref(), Some("PK"));
        assert_eq!(canonical_grade("pk").as_deref(), Some("PK"));
        assert_eq!(canonical_grade("09").as_deref(), Some("9"));
        assert_eq!(canonical_grade("UG").as_deref(), Some("UG"));
        assert_eq!(canonical_grade(" "), None);
    }

    #[test]
    fn withdrawn_enrollment_deactivates_by_default() {
        let normalizer = Normalizer::default();
        let withdrawn = normalizer
            .normalize_enrollment(
                SisVendor::PowerSchool,
                &raw_enrollment(EnrollmentStatus::Withdrawn),
                Uuid::new_v4(),
            )
            .unwrap();
        assert_eq!(withdrawn.status, Some(UserStatus::Inactive));
        assert!(!withdrawn.current);
        assert_eq!(withdrawn.grade.as_deref(), Some("K"));
        assert_eq!(withdrawn.metadata["enrollment"]["status"], "withdrawn");

        let keep = Normalizer::new(DistrictSyncPolicy {
            deactivate_withdrawn: false,
            ..Default::default()
        })
        .normalize_enrollment(
            SisVendor::PowerSchool,
            &raw_enrollment(EnrollmentStatus::Withdrawn),
            Uuid::new_v4(),
        )
        .unwrap();
        assert_eq!(keep.status, None);
    }

    #[test]
    fn relationship_labels_map_to_edge_types() {
        assert_eq!(RelationshipType::from_label(Some("Mother")), RelationshipType::Parent);
        assert_eq!(
            RelationshipType::from_label(Some("Legal Guardian")),
            RelationshipType::Guardian
        );
        assert_eq!(
            RelationshipType::from_label(Some("Emergency Contact")),
            RelationshipType::EmergencyContact
        );
        assert_eq!(RelationshipType::from_label(Some("Aunt")), RelationshipType::Other);
        assert_eq!(RelationshipType::from_label(None), RelationshipType::Guardian);
    }

    #[test]
    fn policy_is_read_from_settings() {
        let settings = json!({"sisPolicy": {"lowercaseEmails": false}});
        let policy = DistrictSyncPolicy::from_settings(&settings);
        assert!(!policy.lowercase_emails);
        assert!(policy.deactivate_withdrawn);
        assert_eq!(DistrictSyncPolicy::from_settings(&json!({})), DistrictSyncPolicy::default());
    }
}
