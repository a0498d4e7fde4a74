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
use self::mapper::PowerSchoolMapper;

/// PowerSchool SIS connector (`/ws/v1` REST API, page-number pagination).
pub struct PowerSchoolConnector {
    client: VendorClient,
}

impl PowerSchoolConnector {
    pub fn new(
        credentials: &SisCredentials,
        config: &VendorClientConfig,
    ) -> Result<Self, ConnectorError> {
        Ok(Self {
            client: VendorClient::new(SisVendor::PowerSchool, credentials, config)?,
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
        outer: &str,
        inner: &str,
        map: impl Fn(&Value) -> Result<T, MappingError>,
    ) -> Result<Listing<T>, ConnectorError> {
        let payload = self.client.get_json(path, query).await?;
        let mut listing = Listing::default();
        for item in PowerSchoolMapper::collection(&payload, outer, inner).iter() {
            match map(item) {
                Ok(mapped) => listing.items.push(mapped),
                Err(error) => listing.rejected.push(MappingFailure {
                    external_id: first_string(item, &["id", "dcid", "contact_id", "contactId"]),
                    error,
                }),
            }
        }
        Ok(listing)
    }
}

#[async_trait]
impl SisConnector for PowerSchoolConnector {
    fn vendor(&self) -> SisVendor {
        SisVendor::PowerSchool
    }

    async fn authenticate(&self) -> Result<(), ConnectorError> {
        self.client.authenticate().await
    }

    async fn test_connection(&self) -> Result<(), ConnectorError> {
        info!("Testing PowerSchool connection");
        self.client.get_json("ws/v1/district", &[]).await?;
        Ok(())
    }

    async fn list_schools(&self) -> Result<Vec<RawSchool>, ConnectorError> {
        Ok(self
            .get_list("ws/v1/district/school", &[], "schools", "school", PowerSchoolMapper::school)
            .await?
            .into_items(SisVendor::PowerSchool, "school"))
    }

    async fn list_students(
        &self,
        school_id: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<StudentPage, ConnectorError> {
        let page = match page_token {
            Some(token) => token.parse::<u32>().map_err(|_| {
                ConnectorError::Configuration(format!("invalid PowerSchool page token '{token}'"))
            })?,
            None => 1,
        };
        let payload = self
            .client
            .get_json(
                &format!("ws/v1/school/{school_id}/student"),
                &[
                    ("expansions", "demographics,contact_info,school_enrollment".to_string()),
                    ("page", page.to_string()),
                    ("pagesize", page_size.to_string()),
                ],
            )
            .await?;

        let items = PowerSchoolMapper::collection(&payload, "students", "student");
        let mut result = StudentPage {
            // A short page is the last one
            next_page_token: (page_size > 0 && items.len() >= page_size as usize)
                .then(|| (page + 1).to_string()),
            ..Default::default()
        };
        for item in &items {
            match PowerSchoolMapper::student(item) {
                Ok(student) => result.students.push(student),
                Err(error) => result.rejected.push(MappingFailure {
                    external_id: first_string(item, &["id", "dcid"]),
                    error,
                }),
            }
        }
        Ok(result)
    }

    async fn get_student(&self, student_id: &str) -> Result<RawStudent, ConnectorError> {
        let payload = self
            .client
            .get_json(
                &format!("ws/v1/student/{student_id}"),
                &[("expansions", "demographics,contact_info,school_enrollment".to_string())],
            )
            .await?;
        Ok(PowerSchoolMapper::student(PowerSchoolMapper::single(&payload, "student"))?)
    }

    async fn get_guardian(&self, guardian_id: &str) -> Result<RawGuardian, ConnectorError> {
        let payload = self
            .client
            .get_json(&format!("ws/contacts/contact/{guardian_id}"), &[])
            .await?;
        Ok(PowerSchoolMapper::guardian(PowerSchoolMapper::single(&payload, "contact"))?)
    }

    async fn get_enrollment(&self, enrollment_id: &str) -> Result<RawEnrollment, ConnectorError> {
        let payload = self
            .client
            .get_json(&format!("ws/v1/enrollment/{enrollment_id}"), &[])
            .await?;
        Ok(PowerSchoolMapper::enrollment(
            PowerSchoolMapper::single(&payload, "enrollment"),
            None,
        )?)
    }

    async fn get_guardians(&self, student_id: &str) -> Result<Listing<RawGuardian>, ConnectorError> {
        self.get_list(
            &format!("ws/contacts/student/{student_id}"),
            &[],
            "contacts",
            "contact",
            PowerSchoolMapper::guardian,
        )
        .await
    }

    async fn get_contacts(&self, student_id: &str) -> Result<Vec<RawContact>, ConnectorError> {
        Ok(self
            .get_list(
                &format!("ws/contacts/student/{student_id}"),
                &[("emergency", "true".to_string())],
                "contacts",
                "contact",
                |item| PowerSchoolMapper::contact(item, student_id),
            )
            .await?
            .into_items(SisVendor::PowerSchool, "contact"))
    }

    async fn get_enrollments(
        &self,
        student_id: &str,
    ) -> Result<Listing<RawEnrollment>, ConnectorError> {
        self.get_list(
            &format!("ws/v1/student/{student_id}/enrollments"),
            &[],
            "enrollments",
            "enrollment",
            |item| PowerSchoolMapper::enrollment(item, Some(student_id)),
        )
        .await
    }

    async fn get_schedule(&self, student_id: &str) -> Result<Vec<RawClassSection>, ConnectorError> {
        Ok(self
            .get_list(
                &format!("ws/v1/student/{student_id}/sections"),
                &[],
                "sections",
                "section",
                PowerSchoolMapper::section,
            )
            .await?
            .into_items(SisVendor::PowerSchool, "section"))
    }

    async fn get_grades(&self, student_id: &str) -> Result<Vec<RawGrade>, ConnectorError> {
        Ok(self
            .get_list(
                &format!("ws/v1/student/{student_id}/grades"),
                &[],
                "grades",
                "grade",
                |item| PowerSchoolMapper::grade(item, student_id),
            )
            .await?
            .into_items(SisVendor::PowerSchool, "grade"))
    }

    async fn get_attendance(
        &self,
        student_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawAttendance>, ConnectorError> {
        let query: Vec<(&str, String)> = since
            .map(|since| ("since", since.format("%Y-%m-%d").to_string()))
            .into_iter()
            .collect();
        Ok(self
            .get_list(
                &format!("ws/v1/student/{student_id}/attendance"),
                &query,
                "attendances",
                "attendance",
                |item| PowerSchoolMapper::attendance(item, student_id),
            )
            .await?
            .into_items(SisVendor::PowerSchool, "attendance"))
    }

    async fn get_assignments(&self, section_id: &str) -> Result<Vec<RawAssignment>, ConnectorError> {
        Ok(self
            .get_list(
                &format!("ws/v1/section/{section_id}/assignments"),
                &[],
                "assignments",
                "assignment",
                |item| PowerSchoolMapper::assignment(item, section_id),
            )
            .await?
            .into_items(SisVendor::PowerSchool, "assignment"))
    }

    async fn get_section_roster(&self, section_id: &str) -> Result<RawRoster, ConnectorError> {
        let payload = self
            .client
            .get_json(&format!("ws/v1/section/{section_id}/section_enrollment"), &[])
            .await?;
        Ok(PowerSchoolMapper::roster(&payload, section_id))
    }

    async fn get_changes(
        &self,
        since: DateTime<Utc>,
        entity_types: Option<&[EntityType]>,
    ) -> Result<Vec<ChangeRecord>, ConnectorError> {
        let payload = self
            .client
            .get_json(
                "ws/v1/changes",
                &[("since", since.to_rfc3339_opts(SecondsFormat::Secs, true))],
            )
            .await?;

        let mut changes = Vec::new();
        for entry in PowerSchoolMapper::collection(&payload, "changes", "change") {
            match PowerSchoolMapper::change(&entry) {
                Ok(Some(change))
                    if entity_types.is_none_or(|types| types.contains(&change.entity_type)) =>
                {
                    changes.push(change)
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "skipping malformed PowerSchool change entry"),
            }
        }
        Ok(changes)
    }
}
