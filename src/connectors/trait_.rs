//! Connector trait definition
//!
//! Defines the vendor-agnostic contract every SIS connector implements, plus
//! the district walk shared by all of them.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::{ConnectorError, MappingError};
use super::raw::{
    RawAssignment, RawAttendance, RawClassSection, RawContact, RawEnrollment, RawGrade,
    RawGuardian, RawRoster, RawSchool, RawStudent,
};
use super::registry::SisVendor;

/// Entity kinds that appear in vendor change feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Student,
    Guardian,
    Enrollment,
    Section,
    Grade,
    Attendance,
    Assignment,
    Contact,
}

impl EntityType {
    /// Case-insensitive; accepts singular and plural vendor spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
        match singular {
            "student" => Some(Self::Student),
            "guardian" | "parent" => Some(Self::Guardian),
            "enrollment" => Some(Self::Enrollment),
            "section" | "class" | "classe" | "course_section" => Some(Self::Section),
            "grade" | "storedgrade" => Some(Self::Grade),
            "attendance" => Some(Self::Attendance),
            "assignment" => Some(Self::Assignment),
            "contact" => Some(Self::Contact),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Guardian => "guardian",
            Self::Enrollment => "enrollment",
            Self::Section => "section",
            Self::Grade => "grade",
            Self::Attendance => "attendance",
            Self::Assignment => "assignment",
            Self::Contact => "contact",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Created,
    Updated,
    Deleted,
}

impl ChangeOperation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "create" | "created" | "insert" | "inserted" | "add" | "added" => Some(Self::Created),
            "update" | "updated" | "modify" | "modified" | "change" | "changed" => {
                Some(Self::Updated)
            }
            "delete" | "deleted" | "remove" | "removed" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// One normalized change-feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: ChangeOperation,
    pub changed_at: DateTime<Utc>,
}

/// A record in a student page that failed mapping.
#[derive(Debug, Clone)]
pub struct MappingFailure {
    /// Identifier, when the payload carried one at all
    pub external_id: Option<String>,
    pub error: MappingError,
}

/// A vendor collection; items that failed mapping are set aside instead of
/// failing the whole list.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub rejected: Vec<MappingFailure>,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl<T> Listing<T> {
    pub fn from_items(items: Vec<T>) -> Self {
        Self {
            items,
            rejected: Vec::new(),
        }
    }

    /// Keeps the mapped items and logs the rejected ones.
    pub fn into_items(self, vendor: SisVendor, entity: &str) -> Vec<T> {
        for rejected in &self.rejected {
            warn!(
                %vendor,
                entity,
                id = rejected.external_id.as_deref().unwrap_or("unknown"),
                error = %rejected.error,
                "dropping unmappable record"
            );
        }
        self.items
    }
}

/// One page of students for a school.
#[derive(Debug, Clone, Default)]
pub struct StudentPage {
    pub students: Vec<RawStudent>,
    pub rejected: Vec<MappingFailure>,
    /// Opaque continuation; `None` on the last page
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Restricts the walk to these school ids (`settings.sisSchoolIds`)
    pub school_ids: Option<Vec<String>>,
    pub include_enrollments: bool,
    pub include_guardians: bool,
    pub page_size: u32,
    pub cancellation: Option<CancellationToken>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            school_ids: None,
            include_enrollments: true,
            include_guardians: true,
            page_size: 100,
            cancellation: None,
        }
    }
}

impl SyncOptions {
    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn includes_school(&self, school_id: &str) -> bool {
        self.school_ids
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|id| id == school_id))
    }
}

/// A failure recorded during a run; never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    pub entity: String,
    pub id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl SyncError {
    pub fn new(entity: impl Into<String>, id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub schools: u64,
    pub students: u64,
    pub enrollments: u64,
    pub guardians: u64,
    pub relationships: u64,
    pub changes: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// True iff `errors` is empty
    pub success: bool,
    pub duration_ms: u64,
    pub stats: SyncStats,
    pub errors: Vec<SyncError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_sync_recommended_at: Option<DateTime<Utc>>,
}

/// Accumulates stats and errors while a run progresses.
#[derive(Debug)]
pub struct SyncProgress {
    started: Instant,
    pub stats: SyncStats,
    pub errors: Vec<SyncError>,
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            stats: SyncStats::default(),
            errors: Vec::new(),
        }
    }

    pub fn record_error(
        &mut self,
        entity: impl Into<String>,
        id: impl Into<String>,
        error: impl fmt::Display,
    ) {
        let error = SyncError::new(entity, id, error);
        warn!(entity = %error.entity, id = %error.id, error = %error.error, "sync error recorded");
        self.stats.errors += 1;
        self.errors.push(error);
    }

    pub fn finish(self) -> SyncResult {
        SyncResult {
            success: self.errors.is_empty(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            stats: self.stats,
            errors: self.errors,
            next_sync_recommended_at: None,
        }
    }
}

/// Callbacks invoked by [`SisConnector::sync_district`] as data arrives.
///
/// An `Err` from any callback is recorded against that entity and the walk
/// moves on.
#[async_trait]
pub trait SyncHandler: Send {
    async fn on_student(&mut self, student: &RawStudent) -> anyhow::Result<()>;

    async fn on_enrollment(
        &mut self,
        student: &RawStudent,
        enrollment: &RawEnrollment,
    ) -> anyhow::Result<()>;

    async fn on_guardian(&mut self, student: &RawStudent, guardian: &RawGuardian)
    -> anyhow::Result<()>;

    /// Called after `on_guardian` succeeded for the same pair.
    async fn on_relationship(
        &mut self,
        student: &RawStudent,
        guardian: &RawGuardian,
    ) -> anyhow::Result<()>;
}

/// Vendor-agnostic SIS connector.
#[async_trait]
pub trait SisConnector: Send + Sync {
    fn vendor(&self) -> SisVendor;

    /// Obtains credentials up front so auth failures surface before any walk.
    async fn authenticate(&self) -> Result<(), ConnectorError>;

    /// Cheap authenticated request that proves the base URL and credentials work.
    async fn test_connection(&self) -> Result<(), ConnectorError>;

    async fn list_schools(&self) -> Result<Vec<RawSchool>, ConnectorError>;

    async fn list_students(
        &self,
        school_id: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<StudentPage, ConnectorError>;

    async fn get_student(&self, student_id: &str) -> Result<RawStudent, ConnectorError>;

    async fn get_guardian(&self, guardian_id: &str) -> Result<RawGuardian, ConnectorError>;

    async fn get_enrollment(&self, enrollment_id: &str) -> Result<RawEnrollment, ConnectorError>;

    async fn get_guardians(&self, student_id: &str) -> Result<Listing<RawGuardian>, ConnectorError>;

    async fn get_contacts(&self, student_id: &str) -> Result<Vec<RawContact>, ConnectorError>;

    async fn get_enrollments(&self, student_id: &str)
    -> Result<Listing<RawEnrollment>, ConnectorError>;

    async fn get_schedule(&self, student_id: &str)
    -> Result<Vec<RawClassSection>, ConnectorError>;

    async fn get_grades(&self, student_id: &str) -> Result<Vec<RawGrade>, ConnectorError>;

    async fn get_attendance(
        &self,
        student_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawAttendance>, ConnectorError>;

    async fn get_assignments(&self, section_id: &str)
    -> Result<Vec<RawAssignment>, ConnectorError>;

    async fn get_section_roster(&self, section_id: &str) -> Result<RawRoster, ConnectorError>;

    /// Change feed since `since`. Entries of unknown entity types are dropped;
    /// `entity_types` further restricts the result.
    async fn get_changes(
        &self,
        since: DateTime<Utc>,
        entity_types: Option<&[EntityType]>,
    ) -> Result<Vec<ChangeRecord>, ConnectorError>;

    /// Fetches students one at a time, in order. Ids the vendor reports as
    /// missing (404) are skipped; any other failure is returned.
    async fn get_students_by_ids(&self, ids: &[String]) -> Result<Vec<RawStudent>, ConnectorError> {
        let mut students = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_student(id).await {
                Ok(student) => students.push(student),
                Err(err) if err.is_not_found() => {
                    debug!(vendor = %self.vendor(), student_id = %id, "student not found, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(students)
    }

    /// Walks every school (in listing order) and every page of students,
    /// feeding records to `handler`. Never fails as a whole: every problem is
    /// recorded in the returned result.
    async fn sync_district(
        &self,
        district_id: Uuid,
        options: &SyncOptions,
        handler: &mut dyn SyncHandler,
    ) -> SyncResult {
        let mut progress = SyncProgress::new();
        let vendor = self.vendor();

        let schools = match self.list_schools().await {
            Ok(schools) => schools,
            Err(err) => {
                progress.record_error("school", district_id.to_string(), err);
                return progress.finish();
            }
        };

        'schools: for school in schools
            .iter()
            .filter(|school| options.includes_school(&school.external_id))
        {
            progress.stats.schools += 1;
            debug!(%vendor, %district_id, school_id = %school.external_id, "walking school");

            let mut page_token: Option<String> = None;
            loop {
                if options.is_cancelled() {
                    progress.record_error("sync", district_id.to_string(), "sync cancelled");
                    break 'schools;
                }

                let page = match self
                    .list_students(&school.external_id, page_token.as_deref(), options.page_size)
                    .await
                {
                    Ok(page) => page,
                    Err(err) => {
                        progress.record_error("school", school.external_id.clone(), err);
                        continue 'schools;
                    }
                };

                record_rejected(&mut progress, "student", &page.rejected);

                for student in &page.students {
                    if options.is_cancelled() {
                        progress.record_error("sync", district_id.to_string(), "sync cancelled");
                        break 'schools;
                    }
                    sync_student(self, student, options, handler, &mut progress).await;
                }

                match page.next_page_token {
                    Some(next) => page_token = Some(next),
                    None => break,
                }
            }
        }

        let result = progress.finish();
        info!(
            %vendor,
            %district_id,
            schools = result.stats.schools,
            students = result.stats.students,
            errors = result.stats.errors,
            duration_ms = result.duration_ms,
            "district walk finished"
        );
        result
    }
}

fn record_rejected(progress: &mut SyncProgress, entity: &str, rejected: &[MappingFailure]) {
    for failure in rejected {
        progress.record_error(
            entity,
            failure.external_id.clone().unwrap_or_else(|| "unknown".into()),
            &failure.error,
        );
    }
}

/// Feeds one student and its enrollments and guardians to the handler.
async fn sync_student<C>(
    connector: &C,
    student: &RawStudent,
    options: &SyncOptions,
    handler: &mut dyn SyncHandler,
    progress: &mut SyncProgress,
) where
    C: SisConnector + ?Sized,
{
    if let Err(err) = handler.on_student(student).await {
        progress.record_error("student", student.external_id.clone(), format!("{err:#}"));
        return;
    }
    progress.stats.students += 1;

    if options.include_enrollments {
        match connector.get_enrollments(&student.external_id).await {
            Ok(enrollments) => {
                record_rejected(progress, "enrollment", &enrollments.rejected);
                for enrollment in &enrollments.items {
                    match handler.on_enrollment(student, enrollment).await {
                        Ok(()) => progress.stats.enrollments += 1,
                        Err(err) => progress.record_error(
                            "enrollment",
                            enrollment.external_id.clone(),
                            format!("{err:#}"),
                        ),
                    }
                }
            }
            Err(err) => progress.record_error("enrollment", student.external_id.clone(), err),
        }
    }

    if options.include_guardians {
        match connector.get_guardians(&student.external_id).await {
            Ok(guardians) => {
                record_rejected(progress, "guardian", &guardians.rejected);
                for guardian in &guardians.items {
                    if let Err(err) = handler.on_guardian(student, guardian).await {
                        progress.record_error(
                            "guardian",
                            guardian.external_id.clone(),
                            format!("{err:#}"),
                        );
                        continue;
                    }
                    progress.stats.guardians += 1;

                    match handler.on_relationship(student, guardian).await {
                        Ok(()) => progress.stats.relationships += 1,
                        Err(err) => progress.record_error(
                            "relationship",
                            format!("{}:{}", student.external_id, guardian.external_id),
                            format!("{err:#}"),
                        ),
                    }
                }
            }
            Err(err) => progress.record_error("guardian", student.external_id.clone(), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::raw::{EnrollmentStatus, raw_metadata};
    use serde_json::json;
    use std::collections::HashMap;

    fn student(id: &str) -> RawStudent {
        RawStudent {
            external_id: id.into(),
            local_id: None,
            first_name: format!("First{id}"),
            last_name: "Last".into(),
            middle_name: None,
            grade: Some("5".into()),
            school_id: Some("s1".into()),
            email: None,
            birth_date: None,
            gender: None,
            metadata: raw_metadata(&json!({"id": id})),
        }
    }

    fn guardian(id: &str) -> RawGuardian {
        RawGuardian {
            external_id: id.into(),
            first_name: "Pat".into(),
            last_name: "Last".into(),
            relationship: Some("Mother".into()),
            is_primary: true,
            email: None,
            phone: None,
            metadata: raw_metadata(&json!({"id": id})),
        }
    }

    /// Two schools; school `s1` has two pages, `s2` fails to list.
    struct FakeConnector {
        pages: HashMap<(String, Option<String>), StudentPage>,
    }

    impl FakeConnector {
        fn new() -> Self {
            let mut pages = HashMap::new();
            pages.insert(
                ("s1".to_string(), None),
                StudentPage {
                    students: vec![student("1"), student("2")],
                    rejected: vec![MappingFailure {
                        external_id: Some("3".into()),
                        error: MappingError::missing("powerschool", "student", "first_name"),
                    }],
                    next_page_token: Some("p2".into()),
                },
            );
            pages.insert(
                ("s1".to_string(), Some("p2".to_string())),
                StudentPage {
                    students: vec![student("4")],
                    rejected: vec![],
                    next_page_token: None,
                },
            );
            Self { pages }
        }
    }

    fn not_found() -> ConnectorError {
        ConnectorError::Http {
            vendor: "powerschool".into(),
            status: 404,
            body: None,
        }
    }

    #[async_trait]
    impl SisConnector for FakeConnector {
        fn vendor(&self) -> SisVendor {
            SisVendor::PowerSchool
        }
        async fn authenticate(&self) -> Result<(), ConnectorError> {
            Ok(())
        }
        async fn test_connection(&self) -> Result<(), ConnectorError> {
            Ok(())
        }
        async fn list_schools(&self) -> Result<Vec<RawSchool>, ConnectorError> {
            Ok(["s1", "s2", "s3"]
                .iter()
                .map(|id| RawSchool {
                    external_id: id.to_string(),
                    name: format!("School {id}"),
                    metadata: json!({}),
                })
                .collect())
        }
        async fn list_students(
            &self,
            school_id: &str,
            page_token: Option<&str>,
            _page_size: u32,
        ) -> Result<StudentPage, ConnectorError> {
            if school_id == "s2" {
                return Err(ConnectorError::Http {
                    vendor: "powerschool".into(),
                    status: 500,
                    body: None,
                });
            }
            Ok(self
                .pages
                .get(&(school_id.to_string(), page_token.map(str::to_string)))
                .cloned()
                .unwrap_or_default())
        }
        async fn get_student(&self, student_id: &str) -> Result<RawStudent, ConnectorError> {
            if student_id == "missing" {
                return Err(not_found());
            }
            Ok(student(student_id))
        }
        async fn get_guardian(&self, guardian_id: &str) -> Result<RawGuardian, ConnectorError> {
            Ok(guardian(guardian_id))
        }
        async fn get_enrollment(&self, _: &str) -> Result<RawEnrollment, ConnectorError> {
            Err(not_found())
        }
        async fn get_guardians(
            &self,
            student_id: &str,
        ) -> Result<Listing<RawGuardian>, ConnectorError> {
            let mut listing = Listing::from_items(vec![guardian(&format!("g{student_id}"))]);
            if student_id == "4" {
                listing.rejected.push(MappingFailure {
                    external_id: Some("g-bad".into()),
                    error: MappingError::missing("powerschool", "guardian", "first_name"),
                });
            }
            Ok(listing)
        }
        async fn get_contacts(&self, _: &str) -> Result<Vec<RawContact>, ConnectorError> {
            Ok(vec![])
        }
        async fn get_enrollments(
            &self,
            student_id: &str,
        ) -> Result<Listing<RawEnrollment>, ConnectorError> {
            Ok(Listing::from_items(vec![RawEnrollment {
                external_id: format!("e{student_id}"),
                student_id: student_id.into(),
                school_id: Some("s1".into()),
                grade: Some("5".into()),
                status: EnrollmentStatus::Active,
                entry_date: None,
                exit_date: None,
                metadata: json!({}),
            }]))
        }
        async fn get_schedule(&self, _: &str) -> Result<Vec<RawClassSection>, ConnectorError> {
            Ok(vec![])
        }
        async fn get_grades(&self, _: &str) -> Result<Vec<RawGrade>, ConnectorError> {
            Ok(vec![])
        }
        async fn get_attendance(
            &self,
            _: &str,
            _: Option<DateTime<Utc>>,
        ) -> Result<Vec<RawAttendance>, ConnectorError> {
            Ok(vec![])
        }
        async fn get_assignments(&self, _: &str) -> Result<Vec<RawAssignment>, ConnectorError> {
            Ok(vec![])
        }
        async fn get_section_roster(&self, section_id: &str) -> Result<RawRoster, ConnectorError> {
            Ok(RawRoster {
                external_id: section_id.into(),
                student_ids: vec![],
                metadata: json!({}),
            })
        }
        async fn get_changes(
            &self,
            _: DateTime<Utc>,
            _: Option<&[EntityType]>,
        ) -> Result<Vec<ChangeRecord>, ConnectorError> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct Recorder {
        students: Vec<String>,
        relationships: Vec<String>,
        fail_student: Option<String>,
        cancel_after_first: Option<CancellationToken>,
    }

    #[async_trait]
    impl SyncHandler for Recorder {
        async fn on_student(&mut self, student: &RawStudent) -> anyhow::Result<()> {
            if self.fail_student.as_deref() == Some(student.external_id.as_str()) {
                anyhow::bail!("constraint violation");
            }
            self.students.push(student.external_id.clone());
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
            Ok(())
        }
        async fn on_enrollment(&mut self, _: &RawStudent, _: &RawEnrollment) -> anyhow::Result<()> {
            Ok(())
        }
        async fn on_guardian(&mut self, _: &RawStudent, _: &RawGuardian) -> anyhow::Result<()> {
            Ok(())
        }
        async fn on_relationship(
            &mut self,
            student: &RawStudent,
            guardian: &RawGuardian,
        ) -> anyhow::Result<()> {
            self.relationships
                .push(format!("{}->{}", student.external_id, guardian.external_id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn walk_contains_failures_and_keeps_going() {
        let connector = FakeConnector::new();
        let mut recorder = Recorder {
            fail_student: Some("2".into()),
            ..Default::default()
        };
        let result = connector
            .sync_district(Uuid::new_v4(), &SyncOptions::default(), &mut recorder)
            .await;

        assert_eq!(recorder.students, vec!["1", "4"]);
        assert_eq!(recorder.relationships, vec!["1->g1", "4->g4"]);
        assert_eq!(result.stats.schools, 3);
        assert_eq!(result.stats.students, 2);
        assert_eq!(result.stats.enrollments, 2);
        assert_eq!(result.stats.guardians, 2);
        // rejected student on page 1, handler failure for "2", listing failure
        // for s2 and the unmappable guardian next to g4
        assert_eq!(result.stats.errors, 4);
        assert_eq!(result.errors.len(), 4);
        assert!(!result.success);
        assert!(result.errors.iter().any(|e| e.entity == "school" && e.id == "s2"));
        assert!(result.errors.iter().any(|e| e.entity == "guardian" && e.id == "g-bad"));
    }

    #[tokio::test]
    async fn allow_list_restricts_schools() {
        let connector = FakeConnector::new();
        let mut recorder = Recorder::default();
        let options = SyncOptions {
            school_ids: Some(vec!["s3".into()]),
            ..Default::default()
        };
        let result = connector
            .sync_district(Uuid::new_v4(), &options, &mut recorder)
            .await;

        assert!(result.success);
        assert_eq!(result.stats.schools, 1);
        assert!(recorder.students.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_the_walk() {
        let connector = FakeConnector::new();
        let token = CancellationToken::new();
        let mut recorder = Recorder {
            cancel_after_first: Some(token.clone()),
            ..Default::default()
        };
        let options = SyncOptions {
            cancellation: Some(token),
            ..Default::default()
        };
        let result = connector
            .sync_district(Uuid::new_v4(), &options, &mut recorder)
            .await;

        assert_eq!(recorder.students, vec!["1"]);
        assert!(result.errors.iter().any(|e| e.entity == "sync"));
    }

    #[tokio::test]
    async fn students_by_ids_skips_not_found() {
        let connector = FakeConnector::new();
        let ids = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let students = connector.get_students_by_ids(&ids).await.unwrap();
        let fetched: Vec<_> = students.iter().map(|s| s.external_id.as_str()).collect();
        assert_eq!(fetched, vec!["a", "b"]);
    }

    #[test]
    fn entity_and_operation_parsing() {
        assert_eq!(EntityType::parse("Students"), Some(EntityType::Student));
        assert_eq!(EntityType::parse("PARENT"), Some(EntityType::Guardian));
        assert_eq!(EntityType::parse("bus_route"), None);
        assert_eq!(ChangeOperation::parse("INSERT"), Some(ChangeOperation::Created));
        assert_eq!(ChangeOperation::parse("removed"), Some(ChangeOperation::Deleted));
        assert_eq!(ChangeOperation::parse("noop"), None);
    }

    #[test]
    fn success_iff_no_errors() {
        let mut progress = SyncProgress::new();
        assert!(progress.finish().success);

        progress = SyncProgress::new();
        progress.record_error("student", "1", "boom");
        let result = progress.finish();
        assert!(!result.success);
        assert_eq!(result.stats.errors, 1);
    }
}
