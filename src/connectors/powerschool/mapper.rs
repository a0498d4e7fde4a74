//! PowerSchool payload mapping.
//!
//! PowerSchool speaks snake_case, nests names and enrollment details under
//! sub-objects, and wraps collections as `{"students": {"student": [...]}}`,
//! where a one-element collection may arrive as a bare object.

use serde_json::Value;

use crate::connectors::error::MappingError;
use crate::connectors::fields::{
    first_bool, first_date, first_datetime, first_f64, first_string, first_u32, one_or_many,
    require_string,
};
use crate::connectors::raw::{
    AttendanceStatus, EnrollmentStatus, RawAssignment, RawAttendance, RawClassSection, RawContact,
    RawEnrollment, RawGrade, RawGuardian, RawRoster, RawSchool, RawStudent, raw_metadata,
};
use crate::connectors::trait_::{ChangeOperation, ChangeRecord, EntityType};

const VENDOR: &str = "powerschool";

pub struct PowerSchoolMapper;

impl PowerSchoolMapper {
    /// Items of a `{outer: {inner: [...] | {...}}}` collection. A bare array
    /// payload is accepted too.
    pub fn collection(payload: &Value, outer: &str, inner: &str) -> Vec<Value> {
        if payload.is_array() {
            return one_or_many(Some(payload));
        }
        match payload.get(outer) {
            Some(Value::Array(_)) => one_or_many(payload.get(outer)),
            Some(wrapper) => one_or_many(wrapper.get(inner)),
            None => Vec::new(),
        }
    }

    /// Unwraps `{"student": {...}}` style single-record envelopes.
    pub fn single<'a>(payload: &'a Value, key: &str) -> &'a Value {
        payload.get(key).filter(|v| v.is_object()).unwrap_or(payload)
    }

    pub fn school(payload: &Value) -> Result<RawSchool, MappingError> {
        Ok(RawSchool {
            external_id: require_string(VENDOR, "school", "id", payload, &["id", "dcid", "school_number"])?,
            name: first_string(payload, &["name", "school_name"]).unwrap_or_default(),
            metadata: raw_metadata(payload),
        })
    }

    pub fn student(payload: &Value) -> Result<RawStudent, MappingError> {
        let external_id = require_string(
            VENDOR,
            "student",
            "id",
            payload,
            &["id", "dcid", "student_id", "studentNumber"],
        )?;
        let first_name = require_string(
            VENDOR,
            "student",
            "first_name",
            payload,
            &["name.first_name", "first_name", "firstName"],
        )?;
        let last_name = require_string(
            VENDOR,
            "student",
            "last_name",
            payload,
            &["name.last_name", "last_name", "lastName"],
        )?;

        Ok(RawStudent {
            external_id,
            local_id: first_string(payload, &["local_id", "student_number", "studentNumber"]),
            first_name,
            last_name,
            middle_name: first_string(payload, &["name.middle_name", "middle_name", "middleName"]),
            grade: first_string(
                payload,
                &["school_enrollment.grade_level", "grade_level", "gradeLevel"],
            ),
            school_id: first_string(
                payload,
                &["school_enrollment.school_id", "school_id", "schoolid"],
            ),
            email: first_string(payload, &["contact_info.email", "email"]),
            birth_date: first_date(payload, &["demographics.birth_date", "birth_date", "dob"]),
            gender: first_string(payload, &["demographics.gender", "gender"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn guardian(payload: &Value) -> Result<RawGuardian, MappingError> {
        let external_id = require_string(
            VENDOR,
            "guardian",
            "id",
            payload,
            &["contact_id", "contactId", "id", "person_id"],
        )?;
        let first_name = require_string(
            VENDOR,
            "guardian",
            "first_name",
            payload,
            &["first_name", "firstName", "name.first_name"],
        )?;
        let last_name = require_string(
            VENDOR,
            "guardian",
            "last_name",
            payload,
            &["last_name", "lastName", "name.last_name"],
        )?;

        Ok(RawGuardian {
            external_id,
            first_name,
            last_name,
            relationship: first_string(
                payload,
                &["relationship", "relationship_type", "relationshipType"],
            ),
            is_primary: first_bool(payload, &["is_primary", "isPrimary", "primary"])
                .unwrap_or(false),
            email: first_string(payload, &["email", "email_address", "emailAddress"]),
            phone: first_string(payload, &["phone", "phone_number", "phoneNumber"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn enrollment(payload: &Value, student_id: Option<&str>) -> Result<RawEnrollment, MappingError> {
        let external_id = require_string(VENDOR, "enrollment", "id", payload, &["id", "dcid"])?;
        let student_id = first_string(payload, &["student_id", "studentid"])
            .or_else(|| student_id.map(str::to_string))
            .ok_or_else(|| MappingError::missing(VENDOR, "enrollment", "student_id"))?;
        let status_code =
            first_string(payload, &["enroll_status", "status"]).unwrap_or_default();

        Ok(RawEnrollment {
            external_id,
            student_id,
            school_id: first_string(payload, &["school_id", "schoolid"]),
            grade: first_string(payload, &["grade_level", "gradeLevel"]),
            status: EnrollmentStatus::from_code(translate_enroll_status(&status_code)),
            entry_date: first_date(payload, &["entry_date", "entrydate"]),
            exit_date: first_date(payload, &["exit_date", "exitdate"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn grade(payload: &Value, student_id: &str) -> Result<RawGrade, MappingError> {
        Ok(RawGrade {
            external_id: require_string(VENDOR, "grade", "id", payload, &["id", "dcid"])?,
            student_id: first_string(payload, &["student_id", "studentid"])
                .unwrap_or_else(|| student_id.to_string()),
            section_id: first_string(payload, &["section_id", "sectionid"]),
            term: first_string(payload, &["store_code", "storecode", "term"]),
            letter_grade: first_string(payload, &["grade", "letter_grade"]),
            percent: first_f64(payload, &["percent", "percentage"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn attendance(payload: &Value, student_id: &str) -> Result<RawAttendance, MappingError> {
        let external_id = require_string(VENDOR, "attendance", "id", payload, &["id", "dcid"])?;
        let date = first_date(payload, &["att_date", "date"])
            .ok_or_else(|| MappingError::missing(VENDOR, "attendance", "att_date"))?;
        let code = first_string(payload, &["att_code", "attendance_code", "code"]).unwrap_or_default();

        Ok(RawAttendance {
            external_id,
            student_id: first_string(payload, &["student_id", "studentid"])
                .unwrap_or_else(|| student_id.to_string()),
            date,
            status: AttendanceStatus::from_code(&code),
            code,
            section_id: first_string(payload, &["section_id", "sectionid"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn section(payload: &Value) -> Result<RawClassSection, MappingError> {
        Ok(RawClassSection {
            external_id: require_string(VENDOR, "section", "id", payload, &["id", "dcid", "section_id"])?,
            course_name: require_string(
                VENDOR,
                "section",
                "course_name",
                payload,
                &["course_name", "course.name", "name"],
            )?,
            course_code: first_string(payload, &["course_number", "course_code"]),
            teacher_id: first_string(payload, &["staff_id", "teacher_id", "teacher"]),
            period: first_string(payload, &["expression", "period"]),
            term: first_string(payload, &["term_id", "term"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn assignment(payload: &Value, section_id: &str) -> Result<RawAssignment, MappingError> {
        Ok(RawAssignment {
            external_id: require_string(
                VENDOR,
                "assignment",
                "id",
                payload,
                &["id", "assignment_id", "assignmentid"],
            )?,
            section_id: first_string(payload, &["section_id", "sectionid"])
                .unwrap_or_else(|| section_id.to_string()),
            title: require_string(VENDOR, "assignment", "name", payload, &["name", "title"])?,
            due_date: first_date(payload, &["due_date", "duedate"]),
            points_possible: first_f64(payload, &["points_possible", "pointspossible", "total_points"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn contact(payload: &Value, student_id: &str) -> Result<RawContact, MappingError> {
        let external_id =
            require_string(VENDOR, "contact", "id", payload, &["contact_id", "contactId", "id"])?;
        let name = first_string(payload, &["name", "full_name"])
            .or_else(|| {
                let parts: Vec<String> = [
                    first_string(payload, &["first_name", "firstName"]),
                    first_string(payload, &["last_name", "lastName"]),
                ]
                .into_iter()
                .flatten()
                .collect();
                (!parts.is_empty()).then(|| parts.join(" "))
            })
            .ok_or_else(|| MappingError::missing(VENDOR, "contact", "name"))?;

        Ok(RawContact {
            external_id,
            student_id: student_id.to_string(),
            name,
            relationship: first_string(payload, &["relationship", "relationship_type"]),
            phone: first_string(payload, &["phone", "phone_number"]),
            email: first_string(payload, &["email", "email_address"]),
            priority: first_u32(payload, &["priority", "contact_priority_order", "sequence"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn roster(payload: &Value, section_id: &str) -> RawRoster {
        let student_ids = Self::collection(payload, "section_enrollments", "section_enrollment")
            .iter()
            .filter_map(|entry| first_string(entry, &["student_id", "studentid"]))
            .collect();
        RawRoster {
            external_id: section_id.to_string(),
            student_ids,
            metadata: raw_metadata(payload),
        }
    }

    /// `Ok(None)` for entity types the engine does not track.
    pub fn change(payload: &Value) -> Result<Option<ChangeRecord>, MappingError> {
        let entity = require_string(VENDOR, "change", "entity", payload, &["entity", "entity_type", "table"])?;
        let Some(entity_type) = EntityType::parse(&entity) else {
            return Ok(None);
        };
        let entity_id = require_string(VENDOR, "change", "id", payload, &["id", "entity_id"])?;
        let action = require_string(VENDOR, "change", "action", payload, &["action", "operation"])?;
        let operation = ChangeOperation::parse(&action)
            .ok_or_else(|| MappingError::invalid(VENDOR, "change", "action", action.clone()))?;
        let changed_at = first_datetime(payload, &["timestamp", "changed_at", "when_modified"])
            .ok_or_else(|| MappingError::missing(VENDOR, "change", "timestamp"))?;

        Ok(Some(ChangeRecord {
            entity_type,
            entity_id,
            operation,
            changed_at,
        }))
    }
}

/// PowerSchool's numeric `enroll_status` values, translated to letter codes
/// before the shared heuristic runs.
fn translate_enroll_status(code: &str) -> &str {
    match code.trim() {
        "0" => "A",
        "2" => "I",
        "3" => "G",
        "-1" => "P",
        other => other,
    }
}
