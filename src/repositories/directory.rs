//! # Directory Repository
//!
//! Idempotent writes of SIS-sourced users and guardian/student edges.
//!
//! Users are keyed by `(district_id, sis_id, role)` and edges by
//! `(user_id, related_user_id, relationship_type)`. Every write inserts with
//! `ON CONFLICT DO NOTHING` and then updates the surviving row, so concurrent
//! writers converge on one row. Identity fields are replaced; metadata is
//! merged key by key.
//!
//! Functions are generic over [`ConnectionTrait`] so the sync engine can call
//! them inside a per-entity transaction.

use chrono::{NaiveDate, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;
use uuid::Uuid;

use crate::connectors::EnrollmentStatus;
use crate::models::user::{self, Entity as User};
use crate::models::user_relationship::{self, Entity as UserRelationship};
use crate::normalization::{
    NormalizedEnrollment, NormalizedRelationship, NormalizedUser, UserRole, UserStatus,
};

/// Whether an upsert created the row or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(Uuid),
    Updated(Uuid),
}

impl UpsertOutcome {
    pub fn id(self) -> Uuid {
        match self {
            Self::Created(id) | Self::Updated(id) => id,
        }
    }

    pub fn is_created(self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Shallow merge: keys in `incoming` overwrite keys in `existing`.
pub fn merge_metadata(existing: &JsonValue, incoming: &JsonValue) -> JsonValue {
    let mut merged = match existing {
        JsonValue::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let JsonValue::Object(map) = incoming {
        for (key, value) in map {
            merged.insert(key.clone(), value.clone());
        }
    }
    JsonValue::Object(merged)
}

/// Treats "nothing inserted" from any backend as a conflict.
fn inserted(result: Result<u64, DbErr>) -> Result<bool, DbErr> {
    match result {
        Ok(rows) => Ok(rows > 0),
        Err(DbErr::RecordNotInserted) => Ok(false),
        Err(err) => Err(err),
    }
}

pub async fn find_user<C: ConnectionTrait>(
    conn: &C,
    district_id: Uuid,
    sis_id: &str,
    role: UserRole,
) -> Result<Option<user::Model>, DbErr> {
    User::find()
        .filter(user::Column::DistrictId.eq(district_id))
        .filter(user::Column::SisId.eq(sis_id))
        .filter(user::Column::Role.eq(role.as_str()))
        .one(conn)
        .await
}

pub async fn upsert_user<C: ConnectionTrait>(
    conn: &C,
    user: &NormalizedUser,
) -> Result<UpsertOutcome, DbErr> {
    let now = Utc::now().fixed_offset();
    let id = Uuid::new_v4();
    let row = user::ActiveModel {
        id: Set(id),
        district_id: Set(user.district_id),
        sis_id: Set(Some(user.sis_id.clone())),
        role: Set(user.role.as_str().to_string()),
        first_name: Set(user.first_name.clone()),
        last_name: Set(user.last_name.clone()),
        middle_name: Set(user.middle_name.clone()),
        email: Set(user.email.clone()),
        phone: Set(user.phone.clone()),
        grade: Set(user.grade.clone()),
        school_id: Set(user.school_id.clone()),
        status: Set(user.status.unwrap_or(UserStatus::Active).as_str().to_string()),
        metadata: Set(user.metadata.clone()),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let created = inserted(
        User::insert(row)
            .on_conflict(
                OnConflict::columns([
                    user::Column::DistrictId,
                    user::Column::SisId,
                    user::Column::Role,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await,
    )?;
    if created {
        return Ok(UpsertOutcome::Created(id));
    }

    let existing = find_user(conn, user.district_id, &user.sis_id, user.role)
        .await?
        .ok_or_else(|| {
            DbErr::RecordNotFound(format!("{} {} after conflicting insert", user.role, user.sis_id))
        })?;
    let existing_id = existing.id;
    let merged = merge_metadata(&existing.metadata, &user.metadata);

    let mut active: user::ActiveModel = existing.into();
    active.first_name = Set(user.first_name.clone());
    active.last_name = Set(user.last_name.clone());
    active.middle_name = Set(user.middle_name.clone());
    active.email = Set(user.email.clone());
    active.phone = Set(user.phone.clone());
    active.grade = Set(user.grade.clone());
    active.school_id = Set(user.school_id.clone());
    if let Some(status) = user.status {
        active.status = Set(status.as_str().to_string());
    }
    active.metadata = Set(merged);
    active.updated_at = Set(now);
    active.update(conn).await?;

    Ok(UpsertOutcome::Updated(existing_id))
}

/// Whether `incoming` may replace the enrollment already recorded under
/// `metadata.enrollment`.
///
/// A current enrollment (active or pre-registered) outranks a historical one;
/// between two of the same kind the later entry date wins. Updates to the
/// recorded enrollment itself always apply.
pub fn supersedes(recorded: &JsonValue, incoming: &NormalizedEnrollment) -> bool {
    let Some(recorded) = recorded.get("enrollment").filter(|e| e.is_object()) else {
        return true;
    };
    let recorded_id = match recorded.get("externalId") {
        Some(JsonValue::String(id)) => Some(id.clone()),
        Some(JsonValue::Number(id)) => Some(id.to_string()),
        _ => None,
    };
    if recorded_id.as_deref().is_none_or(|id| id == incoming.external_id) {
        return true;
    }

    let recorded_current = recorded
        .get("status")
        .and_then(JsonValue::as_str)
        .and_then(|status| serde_json::from_value::<EnrollmentStatus>(JsonValue::from(status)).ok())
        .is_some_and(|status| status.is_current());
    match (incoming.current, recorded_current) {
        (true, false) => true,
        (false, true) => false,
        _ => {
            let recorded_entry = recorded
                .get("entryDate")
                .and_then(JsonValue::as_str)
                .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok());
            incoming.entry_date >= recorded_entry
        }
    }
}

/// Applies enrollment facts onto the student's row, unless the student
/// already carries an enrollment that outranks this one (see [`supersedes`]).
///
/// Returns `None` when the student has not been synced yet.
pub async fn apply_enrollment<C: ConnectionTrait>(
    conn: &C,
    enrollment: &NormalizedEnrollment,
) -> Result<Option<Uuid>, DbErr> {
    let Some(student) = find_user(
        conn,
        enrollment.district_id,
        &enrollment.student_sis_id,
        UserRole::Student,
    )
    .await?
    else {
        return Ok(None);
    };
    let student_id = student.id;
    if !supersedes(&student.metadata, enrollment) {
        debug!(
            student_id = %student_id,
            enrollment_id = %enrollment.external_id,
            "Historical enrollment does not replace the current one"
        );
        return Ok(Some(student_id));
    }
    let merged = merge_metadata(&student.metadata, &enrollment.metadata);

    let mut active: user::ActiveModel = student.into();
    if let Some(school_id) = &enrollment.school_id {
        active.school_id = Set(Some(school_id.clone()));
    }
    if let Some(grade) = &enrollment.grade {
        active.grade = Set(Some(grade.clone()));
    }
    if let Some(status) = enrollment.status {
        active.status = Set(status.as_str().to_string());
    }
    active.metadata = Set(merged);
    active.updated_at = Set(Utc::now().fixed_offset());
    active.update(conn).await?;

    Ok(Some(student_id))
}

pub async fn upsert_relationship<C: ConnectionTrait>(
    conn: &C,
    edge: &NormalizedRelationship,
) -> Result<UpsertOutcome, DbErr> {
    let now = Utc::now().fixed_offset();
    let id = Uuid::new_v4();
    let row = user_relationship::ActiveModel {
        id: Set(id),
        district_id: Set(edge.district_id),
        user_id: Set(edge.user_id),
        related_user_id: Set(edge.related_user_id),
        relationship_type: Set(edge.relationship_type.as_str().to_string()),
        status: Set(edge.status.as_str().to_string()),
        is_primary: Set(edge.is_primary),
        metadata: Set(edge.metadata.clone()),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let created = inserted(
        UserRelationship::insert(row)
            .on_conflict(
                OnConflict::columns([
                    user_relationship::Column::UserId,
                    user_relationship::Column::RelatedUserId,
                    user_relationship::Column::RelationshipType,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await,
    )?;
    if created {
        return Ok(UpsertOutcome::Created(id));
    }

    let existing = UserRelationship::find()
        .filter(user_relationship::Column::UserId.eq(edge.user_id))
        .filter(user_relationship::Column::RelatedUserId.eq(edge.related_user_id))
        .filter(user_relationship::Column::RelationshipType.eq(edge.relationship_type.as_str()))
        .one(conn)
        .await?
        .ok_or_else(|| {
            DbErr::RecordNotFound(format!(
                "relationship {} -> {} after conflicting insert",
                edge.user_id, edge.related_user_id
            ))
        })?;
    let existing_id = existing.id;
    let merged = merge_metadata(&existing.metadata, &edge.metadata);

    let mut active: user_relationship::ActiveModel = existing.into();
    active.status = Set(edge.status.as_str().to_string());
    active.is_primary = Set(edge.is_primary);
    active.metadata = Set(merged);
    active.updated_at = Set(now);
    active.update(conn).await?;

    Ok(UpsertOutcome::Updated(existing_id))
}

/// Marks a user inactive. Returns `false` when no such user exists.
pub async fn deactivate_user<C: ConnectionTrait>(
    conn: &C,
    district_id: Uuid,
    sis_id: &str,
    role: UserRole,
) -> Result<bool, DbErr> {
    let Some(existing) = find_user(conn, district_id, sis_id, role).await? else {
        return Ok(false);
    };
    let mut active: user::ActiveModel = existing.into();
    active.status = Set(UserStatus::Inactive.as_str().to_string());
    active.updated_at = Set(Utc::now().fixed_offset());
    active.update(conn).await?;
    Ok(true)
}

/// Relationships pointing at `student_id`, for operator reads and tests.
pub async fn relationships_for_student<C: ConnectionTrait>(
    conn: &C,
    student_id: Uuid,
) -> Result<Vec<user_relationship::Model>, DbErr> {
    UserRelationship::find()
        .filter(user_relationship::Column::RelatedUserId.eq(student_id))
        .all(conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_top_level_keys_only() {
        let existing = json!({"sisVendor": "powerschool", "note": "keep", "sisRaw": {"a": 1}});
        let incoming = json!({"sisRaw": {"b": 2}, "gender": "F"});
        assert_eq!(
            merge_metadata(&existing, &incoming),
            json!({"sisVendor": "powerschool", "note": "keep", "sisRaw": {"b": 2}, "gender": "F"})
        );
        assert_eq!(merge_metadata(&JsonValue::Null, &incoming), incoming);
    }

    fn enrollment(id: &str, current: bool, entry: Option<&str>) -> NormalizedEnrollment {
        NormalizedEnrollment {
            district_id: Uuid::nil(),
            student_sis_id: "1".into(),
            external_id: id.into(),
            current,
            entry_date: entry.map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()),
            school_id: None,
            grade: None,
            status: None,
            metadata: json!({}),
        }
    }

    #[test]
    fn current_enrollment_outranks_historical_ones() {
        let active = json!({"enrollment": {
            "externalId": "101", "status": "active", "entryDate": "2025-08-20"
        }});
        let withdrawn = json!({"enrollment": {
            "externalId": "90", "status": "withdrawn", "entryDate": "2024-08-21"
        }});

        assert!(!supersedes(&active, &enrollment("90", false, Some("2024-08-21"))));
        assert!(supersedes(&withdrawn, &enrollment("101", true, Some("2025-08-20"))));
        // The recorded enrollment changing status is always applied
        assert!(supersedes(&active, &enrollment("101", false, Some("2025-08-20"))));
        // Same kind: the later entry date wins
        assert!(supersedes(&withdrawn, &enrollment("95", false, Some("2025-01-10"))));
        assert!(!supersedes(&active, &enrollment("77", true, Some("2023-08-20"))));
        assert!(supersedes(&json!({"sisVendor": "powerschool"}), &enrollment("1", false, None)));
    }

    #[test]
    fn not_inserted_is_a_conflict() {
        assert!(inserted(Ok(1)).unwrap());
        assert!(!inserted(Ok(0)).unwrap());
        assert!(!inserted(Err(DbErr::RecordNotInserted)).unwrap());
        assert!(inserted(Err(DbErr::Custom("boom".into()))).is_err());
    }
}
