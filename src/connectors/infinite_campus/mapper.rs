//! Infinite Campus payload mapping.
//!
//! Campus payloads are PascalCase, but field spellings drift between API
//! versions (`StudentID`, `StudentId`, `studentNumber`), so every lookup
//! carries the known variants. Collections arrive as `{"Data": [...]}`.

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

const VENDOR: &str = "infinite_campus";

const STUDENT_ID: &[&str] = &["StudentID", "StudentId", "studentId", "studentNumber", "PersonID"];

pub struct InfiniteCampusMapper;

impl InfiniteCampusMapper {
    /// Items under `key` (falling back to `Data`), or the payload itself when it is an array.
    pub fn collection(payload: &Value, key: &str) -> Vec<Value> {
        if payload.is_array() {
            return one_or_many(Some(payload));
        }
        one_or_many(payload.get(key).or_else(|| payload.get("Data")))
    }

    /// Unwraps `{"Data": {...}}` single-record envelopes.
    pub fn single(payload: &Value) -> &Value {
        payload.get("Data").filter(|v| v.is_object()).unwrap_or(payload)
    }

    pub fn next_page_token(payload: &Value) -> Option<String> {
        first_string(payload, &["NextPageToken", "nextPageToken", "Paging.NextPageToken"])
    }

    pub fn school(payload: &Value) -> Result<RawSchool, MappingError> {
        Ok(RawSchool {
            external_id: require_string(VENDOR, "school", "SchoolID", payload, &["SchoolID", "SchoolId", "schoolId", "ID"])?,
            name: first_string(payload, &["Name", "SchoolName", "name"]).unwrap_or_default(),
            metadata: raw_metadata(payload),
        })
    }

    pub fn student(payload: &Value) -> Result<RawStudent, MappingError> {
        let external_id = require_string(VENDOR, "student", "StudentID", payload, STUDENT_ID)?;
        let first_name =
            require_string(VENDOR, "student", "FirstName", payload, &["FirstName", "firstName"])?;
        let last_name =
            require_string(VENDOR, "student", "LastName", payload, &["LastName", "lastName"])?;

        Ok(RawStudent {
            external_id,
            local_id: first_string(payload, &["StudentNumber", "LocalID", "localId"]),
            first_name,
            last_name,
            middle_name: first_string(payload, &["MiddleName", "middleName"]),
            grade: first_string(payload, &["GradeLevel", "Grade", "gradeLevel"]),
            school_id: first_string(payload, &["SchoolID", "SchoolId", "schoolId"]),
            email: first_string(payload, &["Email", "EmailAddress", "email"]),
            birth_date: first_date(payload, &["BirthDate", "DateOfBirth", "birthDate"]),
            gender: first_string(payload, &["Gender", "gender"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn guardian(payload: &Value) -> Result<RawGuardian, MappingError> {
        Ok(RawGuardian {
            external_id: require_string(
                VENDOR,
                "guardian",
                "GuardianID",
                payload,
                &["GuardianID", "GuardianId", "ContactID", "PersonID", "guardianId"],
            )?,
            first_name: require_string(VENDOR, "guardian", "FirstName", payload, &["FirstName", "firstName"])?,
            last_name: require_string(VENDOR, "guardian", "LastName", payload, &["LastName", "lastName"])?,
            relationship: first_string(payload, &["Relationship", "RelationshipType", "relationship"]),
            is_primary: first_bool(payload, &["IsPrimary", "Primary", "isPrimary"]).unwrap_or(false),
            email: first_string(payload, &["Email", "EmailAddress", "email"]),
            phone: first_string(payload, &["Phone", "PhoneNumber", "HomePhone", "phone"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn enrollment(payload: &Value, student_id: Option<&str>) -> Result<RawEnrollment, MappingError> {
        let external_id = require_string(
            VENDOR,
            "enrollment",
            "EnrollmentID",
            payload,
            &["EnrollmentID", "EnrollmentId", "enrollmentId"],
        )?;
        let student_id = first_string(payload, STUDENT_ID)
            .or_else(|| student_id.map(str::to_string))
            .ok_or_else(|| MappingError::missing(VENDOR, "enrollment", "StudentID"))?;
        let status = first_string(payload, &["Status", "EnrollmentStatus", "status"]).unwrap_or_default();

        Ok(RawEnrollment {
            external_id,
            student_id,
            school_id: first_string(payload, &["SchoolID", "SchoolId", "schoolId"]),
            grade: first_string(payload, &["GradeLevel", "Grade", "gradeLevel"]),
            status: EnrollmentStatus::from_code(&status),
            entry_date: first_date(payload, &["StartDate", "EntryDate", "startDate"]),
            exit_date: first_date(payload, &["EndDate", "ExitDate", "endDate"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn grade(payload: &Value, student_id: &str) -> Result<RawGrade, MappingError> {
        Ok(RawGrade {
            external_id: require_string(VENDOR, "grade", "GradeID", payload, &["GradeID", "GradeId", "ScoreID"])?,
            student_id: first_string(payload, STUDENT_ID).unwrap_or_else(|| student_id.to_string()),
            section_id: first_string(payload, &["SectionID", "SectionId", "sectionId"]),
            term: first_string(payload, &["TermName", "Term", "term"]),
            letter_grade: first_string(payload, &["Score", "LetterGrade", "Grade"]),
            percent: first_f64(payload, &["Percent", "Percentage", "percent"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn attendance(payload: &Value, student_id: &str) -> Result<RawAttendance, MappingError> {
        let external_id = require_string(
            VENDOR,
            "attendance",
            "AttendanceID",
            payload,
            &["AttendanceID", "AttendanceId", "attendanceId"],
        )?;
        let date = first_date(payload, &["Date", "AttendanceDate", "date"])
            .ok_or_else(|| MappingError::missing(VENDOR, "attendance", "Date"))?;
        let code = first_string(payload, &["Code", "Status", "Excuse", "code"]).unwrap_or_default();

        Ok(RawAttendance {
            external_id,
            student_id: first_string(payload, STUDENT_ID).unwrap_or_else(|| student_id.to_string()),
            date,
            status: AttendanceStatus::from_code(&code),
            code,
            section_id: first_string(payload, &["SectionID", "SectionId", "sectionId"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn section(payload: &Value) -> Result<RawClassSection, MappingError> {
        Ok(RawClassSection {
            external_id: require_string(VENDOR, "section", "SectionID", payload, &["SectionID", "SectionId", "sectionId"])?,
            course_name: require_string(
                VENDOR,
                "section",
                "CourseName",
                payload,
                &["CourseName", "Course.Name", "courseName"],
            )?,
            course_code: first_string(payload, &["CourseNumber", "CourseCode", "Course.Number"]),
            teacher_id: first_string(payload, &["TeacherID", "TeacherPersonID", "teacherId"]),
            period: first_string(payload, &["Period", "PeriodName", "period"]),
            term: first_string(payload, &["TermName", "Term", "term"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn assignment(payload: &Value, section_id: &str) -> Result<RawAssignment, MappingError> {
        Ok(RawAssignment {
            external_id: require_string(
                VENDOR,
                "assignment",
                "AssignmentID",
                payload,
                &["AssignmentID", "AssignmentId", "ObjectSectionID"],
            )?,
            section_id: first_string(payload, &["SectionID", "SectionId"])
                .unwrap_or_else(|| section_id.to_string()),
            title: require_string(VENDOR, "assignment", "Name", payload, &["Name", "Title", "AssignmentName"])?,
            due_date: first_date(payload, &["DueDate", "dueDate"]),
            points_possible: first_f64(payload, &["TotalPoints", "PointsPossible", "totalPoints"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn contact(payload: &Value, student_id: &str) -> Result<RawContact, MappingError> {
        let external_id = require_string(
            VENDOR,
            "contact",
            "ContactID",
            payload,
            &["ContactID", "ContactId", "PersonID"],
        )?;
        let name = first_string(payload, &["Name", "FullName"])
            .or_else(|| {
                let parts: Vec<String> = [
                    first_string(payload, &["FirstName"]),
                    first_string(payload, &["LastName"]),
                ]
                .into_iter()
                .flatten()
                .collect();
                (!parts.is_empty()).then(|| parts.join(" "))
            })
            .ok_or_else(|| MappingError::missing(VENDOR, "contact", "Name"))?;

        Ok(RawContact {
            external_id,
            student_id: student_id.to_string(),
            name,
            relationship: first_string(payload, &["Relationship", "RelationshipType"]),
            phone: first_string(payload, &["Phone", "PhoneNumber", "CellPhone"]),
            email: first_string(payload, &["Email", "EmailAddress"]),
            priority: first_u32(payload, &["Sequence", "Priority", "EmergencyPriority"]),
            metadata: raw_metadata(payload),
        })
    }

    pub fn roster(payload: &Value, section_id: &str) -> RawRoster {
        let student_ids = Self::collection(payload, "Students")
            .iter()
            .filter_map(|entry| first_string(entry, STUDENT_ID))
            .collect();
        RawRoster {
            external_id: section_id.to_string(),
            student_ids,
            metadata: raw_metadata(payload),
        }
    }

    /// `Ok(None)` for entity types the engine does not track.
    pub fn change(payload: &Value) -> Result<Option<ChangeRecord>, MappingError> {
        let entity = require_string(VENDOR, "change", "EntityType", payload, &["EntityType", "entityType"])?;
        let Some(entity_type) = EntityType::parse(&entity) else {
            return Ok(None);
        };
        let entity_id =
            require_string(VENDOR, "change", "EntityID", payload, &["EntityID", "EntityId", "entityId"])?;
        let operation_raw =
            require_string(VENDOR, "change", "Operation", payload, &["Operation", "operation", "ChangeType"])?;
        let operation = ChangeOperation::parse(&operation_raw).ok_or_else(|| {
            MappingError::invalid(VENDOR, "change", "Operation", operation_raw.clone())
        })?;
        let changed_at = first_datetime(payload, &["ChangedAt", "ModifiedDate", "changedAt"])
            .ok_or_else(|| MappingError::missing(VENDOR, "change", "ChangedAt"))?;

        Ok(Some(ChangeRecord {
            entity_type,
            entity_id,
            operation,
            changed_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_reference_student_fixture() {
        let payload = json!({
            "StudentID": "42",
            "FirstName": "Grace",
            "LastName": "Hopper",
            "GradeLevel": "11"
        });
        let student = InfiniteCampusMapper::student(&payload).unwrap();
        assert_eq!(student.external_id, "42");
        assert_eq!(student.first_name, "Grace");
        assert_eq!(student.last_name, "Hopper");
        assert_eq!(student.grade.as_deref(), Some("11"));
        assert_eq!(student.metadata["raw"], payload);
    }

    #[test]
    fn identifier_variants_and_numbers_are_accepted() {
        let by_number = json!({"studentNumber": 77, "FirstName": "A", "LastName": "B"});
        let by_id = json!({"StudentId": "x-1", "FirstName": "A", "LastName": "B"});
        assert_eq!(InfiniteCampusMapper::student(&by_number).unwrap().external_id, "77");
        assert_eq!(InfiniteCampusMapper::student(&by_id).unwrap().external_id, "x-1");
    }

    #[test]
    fn missing_identity_fails_fast() {
        let err = InfiniteCampusMapper::student(&json!({"FirstName": "No", "LastName": "Id"}))
            .unwrap_err();
        assert_eq!(err, MappingError::missing("infinite_campus", "student", "StudentID"));
    }

    #[test]
    fn attendance_status_uses_code_heuristic() {
        let record = InfiniteCampusMapper::attendance(
            &json!({"AttendanceID": 5, "Date": "09/03/2024", "Code": "UNX"}),
            "42",
        )
        .unwrap();
        assert_eq!(record.status, AttendanceStatus::Absent);
        assert_eq!(record.code, "UNX");
        assert_eq!(record.student_id, "42");
    }

    #[test]
    fn enrollment_letter_codes() {
        let enrollment = InfiniteCampusMapper::enrollment(
            &json!({"EnrollmentID": 9, "Status": "Withdrawn", "StartDate": "2024-08-20"}),
            Some("42"),
        )
        .unwrap();
        assert_eq!(enrollment.status, EnrollmentStatus::Withdrawn);
        assert_eq!(enrollment.student_id, "42");
    }

    #[test]
    fn change_records_are_normalized() {
        let change = InfiniteCampusMapper::change(&json!({
            "EntityType": "Student",
            "EntityID": 42,
            "Operation": "Deleted",
            "ChangedAt": "2026-10-01T12:00:00Z"
        }))
        .unwrap()
        .unwrap();
        assert_eq!(change.entity_type, EntityType::Student);
        assert_eq!(change.entity_id, "42");
        assert_eq!(change.operation, ChangeOperation::Deleted);
    }

    #[test]
    fn page_token_is_read_from_envelope() {
        let payload = json!({"Data": [], "NextPageToken": "abc"});
        assert_eq!(InfiniteCampusMapper::next_page_token(&payload).as_deref(), Some("abc"));
        assert_eq!(InfiniteCampusMapper::next_page_token(&json!({"Data": []})), None);
    }
}
