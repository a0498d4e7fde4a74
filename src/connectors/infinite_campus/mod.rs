pub mod mapper;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::VendorClientConfig;
use crate::connectors::client::VendorClient;
use crate::connectors::credentials::SisCredentials;
use crate::connectors::error::{ConnectorError, MappingError};
use crate::connectors::fields::first_string;
use crate::connectors::raw::{
    RawAssignment, RawAttendance, RawClassSection, RawContact, RawEnrollment, RawGrade,
    RawGuardian, RawRoster, RawSchool, RawStudent,
};
use crate::connectors::registry::SisVendor;
use crate::connectors::trait_::{
    ChangeRecord, EntityType, Listing, MappingFailure, SisConnector, StudentPage,
};
use self::mapper::InfiniteCampusMapper;

/// Infinite Campus SIS connector (`/api/v1`, continuation-token pagination).
pub struct InfiniteCampusConnector {
    client: VendorClient,
}

impl InfiniteCampusConnector {
    pub fn new(
        credentials: &SisCredentials,
        config: &VendorClientConfig,
    ) -> Result<Self, ConnectorError> {
        Ok(Self {
            client: VendorClient::new(SisVendor::InfiniteCampus, credentials, config)?,
        })
    }

    /// Create from a pre-built client (useful for testing).
    pub fn from_client(client: VendorClient) -> Self {
        Self { client }
    }

    async fn get_list<T>(
        &self,
        path: &str,
        query: &[(&str, String)],
        key: &str,
        map: impl Fn(&Value) -> Result<T, MappingError>,
    ) -> Result<Listing<T>, ConnectorError> {
        let payload = self.client.get_json(path, query).await?;
        let mut listing = Listing::default();
        for item in InfiniteCampusMapper::collection(&payload, key) {
            match map(&item) {
                Ok(mapped) => listing.items.push(mapped),
                Err(error) => listing.rejected.push(MappingFailure {
                    external_id: first_string(
                        &item,
                        &["EnrollmentID", "GuardianID", "ContactID", "PersonID", "ID", "id"],
                    ),
                    error,
                }),
            }
        }
        Ok(listing)
    }
}

#[async_trait]
impl SisConnector for InfiniteCampusConnector {
    fn vendor(&self) -> SisVendor {
        SisVendor::InfiniteCampus
    }

    async fn authenticate(&self) -> Result<(), ConnectorError> {
        self.client.authenticate().await
    }

    async fn test_connection(&self) -> Result<(), ConnectorError> {
        info!("Testing Infinite Campus connection");
        self.client.get_json("api/v1/district", &[]).await?;
        Ok(())
    }

    async fn list_schools(&self) -> Result<Vec<RawSchool>, ConnectorError> {
        Ok(self
            .get_list("api/v1/schools", &[], "Schools", InfiniteCampusMapper::school)
            .await?
            .into_items(SisVendor::InfiniteCampus, "school"))
    }

    async fn list_students(
        &self,
        school_id: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<StudentPage, ConnectorError> {
        let mut query = vec![("pageSize", page_size.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let payload = self
            .client
            .get_json(&format!("api/v1/schools/{school_id}/students"), &query)
            .await?;

        let mut result = StudentPage {
            next_page_token: InfiniteCampusMapper::next_page_token(&payload),
            ..Default::default()
        };
        for item in InfiniteCampusMapper::collection(&payload, "Students") {
            match InfiniteCampusMapper::student(&item) {
                Ok(student) => result.students.push(student),
                Err(error) => result.rejected.push(MappingFailure {
                    external_id: first_string(&item, &["StudentID", "StudentId", "studentNumber"]),
                    error,
                }),
            }
        }
        // A repeated token would loop forever
        if result.next_page_token.as_deref() == page_token && page_token.is_some() {
            warn!(school_id, "Infinite Campus returned the same page token, stopping");
            result.next_page_token = None;
        }
        Ok(result)
    }

    async fn get_student(&self, student_id: &str) -> Result<RawStudent, ConnectorError> {
        let payload = self
            .client
            .get_json(&format!("api/v1/students/{student_id}"), &[])
            .await?;
        Ok(InfiniteCampusMapper::student(InfiniteCampusMapper::single(&payload))?)
    }

    async fn get_guardian(&self, guardian_id: &str) -> Result<RawGuardian, ConnectorError> {
        let payload = self
            .client
            .get_json(&format!("api/v1/guardians/{guardian_id}"), &[])
            .await?;
        Ok(InfiniteCampusMapper::guardian(InfiniteCampusMapper::single(&payload))?)
    }

    async fn get_enrollment(&self, enrollment_id: &str) -> Result<RawEnrollment, ConnectorError> {
        let payload = self
            .client
            .get_json(&format!("api/v1/enrollments/{enrollment_id}"), &[])
            .await?;
        Ok(InfiniteCampusMapper::enrollment(InfiniteCampusMapper::single(&payload), None)?)
    }

    async fn get_guardians(&self, student_id: &str) -> Result<Listing<RawGuardian>, ConnectorError> {
        self.get_list(
            &format!("api/v1/students/{student_id}/guardians"),
            &[],
            "Guardians",
            InfiniteCampusMapper::guardian,
        )
        .await
    }

    async fn get_contacts(&self, student_id: &str) -> Result<Vec<RawContact>, ConnectorError> {
        Ok(self
            .get_list(
                &format!("api/v1/students/{student_id}/contacts"),
                &[],
                "Contacts",
                |item| InfiniteCampusMapper::contact(item, student_id),
            )
            .await?
            .into_items(SisVendor::InfiniteCampus, "contact"))
    }

    async fn get_enrollments(
        &self,
        student_id: &str,
    ) -> Result<Listing<RawEnrollment>, ConnectorError> {
        self.get_list(
            &format!("api/v1/students/{student_id}/enrollments"),
            &[],
            "Enrollments",
            |item| InfiniteCampusMapper::enrollment(item, Some(student_id)),
        )
        .await
    }

    async fn get_schedule(&self, student_id: &str) -> Result<Vec<RawClassSection>, ConnectorError> {
        Ok(self
            .get_list(
                &format!("api/v1/students/{student_id}/schedule"),
                &[],
                "Sections",
                InfiniteCampusMapper::section,
            )
            .await?
            .into_items(SisVendor::InfiniteCampus, "section"))
    }

    async fn get_grades(&self, student_id: &str) -> Result<Vec<RawGrade>, ConnectorError> {
        Ok(self
            .get_list(
                &format!("api/v1/students/{student_id}/grades"),
                &[],
                "Grades",
                |item| InfiniteCampusMapper::grade(item, student_id),
            )
            .await?
            .into_items(SisVendor::InfiniteCampus, "grade"))
    }

    async fn get_attendance(
        &self,
        student_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawAttendance>, ConnectorError> {
        let query: Vec<(&str, String)> = since
            .map(|since| ("startDate", since.format("%Y-%m-%d").to_string()))
            .into_iter()
            .collect();
        Ok(self
            .get_list(
                &format!("api/v1/students/{student_id}/attendance"),
                &query,
                "Attendance",
                |item| InfiniteCampusMapper::attendance(item, student_id),
            )
            .await?
            .into_items(SisVendor::InfiniteCampus, "attendance"))
    }

    async fn get_assignments(&self, section_id: &str) -> Result<Vec<RawAssignment>, ConnectorError> {
        Ok(self
            .get_list(
                &format!("api/v1/sections/{section_id}/assignments"),
                &[],
                "Assignments",
                |item| InfiniteCampusMapper::assignment(item, section_id),
            )
            .await?
            .into_items(SisVendor::InfiniteCampus, "assignment"))
    }

    async fn get_section_roster(&self, section_id: &str) -> Result<RawRoster, ConnectorError> {
        let payload = self
            .client
            .get_json(&format!("api/v1/sections/{section_id}/roster"), &[])
            .await?;
        Ok(InfiniteCampusMapper::roster(&payload, section_id))
    }

    async fn get_changes(
        &self,
        since: DateTime<Utc>,
        entity_types: Option<&[EntityType]>,
    ) -> Result<Vec<ChangeRecord>, ConnectorError> {
        let mut query = vec![("since", since.to_rfc3339_opts(SecondsFormat::Secs, true))];
        if let Some(types) = entity_types {
            let joined = types
                .iter()
                .map(EntityType::as_str)
                .collect::<Vec<_>>()
                .join(",");
            query.push(("entityTypes", joined));
        }
        let payload = self.client.get_json("api/v1/changes", &query).await?;

        let mut changes = Vec::new();
        for entry in InfiniteCampusMapper::collection(&payload, "Changes") {
            match InfiniteCampusMapper::change(&entry) {
                Ok(Some(change))
                    if entity_types.is_none_or(|types| types.contains(&change.entity_type)) =>
                {
                    changes.push(change)
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "skipping malformed Infinite Campus change entry"),
            }
        }
        Ok(changes)
    }
}
