//! # District Repository
//!
//! District lookups, the SIS configuration stored in `settings`, the
//! `featureFlags.sis.lastSync` marker and the district-scoped sync lease.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde_json::{Map, Value as JsonValue, json};
use uuid::Uuid;

use crate::connectors::SisCredentials;
use crate::models::district::{self, Column, Entity as District, Model};

/// Repository for district reads and sync bookkeeping
pub struct DistrictRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> DistrictRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, district_id: Uuid) -> Result<Option<Model>, DbErr> {
        District::find_by_id(district_id).one(self.db).await
    }

    /// Districts whose settings carry a `sisCredentials` object.
    pub async fn list_with_credentials(&self) -> Result<Vec<Model>, DbErr> {
        let districts = District::find().all(self.db).await?;
        Ok(districts
            .into_iter()
            .filter(|d| d.settings.get("sisCredentials").is_some_and(JsonValue::is_object))
            .collect())
    }

    /// Records `at` under `featureFlags.sis.lastSync`, keeping every other flag.
    ///
    /// The read and the write share one transaction so a concurrent flag
    /// update is not overwritten with stale flags.
    pub async fn set_last_sync(&self, district_id: Uuid, at: DateTime<Utc>) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;
        let district = District::find_by_id(district_id)
            .one(&txn)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("district {district_id}")))?;

        let mut flags = match district.feature_flags.clone() {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        let mut sis = match flags.remove("sis") {
            Some(JsonValue::Object(map)) => map,
            _ => Map::new(),
        };
        sis.insert("lastSync".into(), json!(at.to_rfc3339()));
        flags.insert("sis".into(), JsonValue::Object(sis));

        let mut active: district::ActiveModel = district.into();
        active.feature_flags = Set(JsonValue::Object(flags));
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&txn).await?;
        txn.commit().await
    }

    /// Takes the district lease for `owner` unless another holder's lease is still live.
    ///
    /// Returns `false` when the lease is held elsewhere.
    pub async fn acquire_lease(
        &self,
        district_id: Uuid,
        owner: Uuid,
        ttl: Duration,
    ) -> Result<bool, DbErr> {
        let now = Utc::now();
        let result = District::update_many()
            .col_expr(Column::SyncLeaseOwner, Expr::value(Some(owner)))
            .col_expr(
                Column::SyncLeaseExpiresAt,
                Expr::value(Some((now + ttl).fixed_offset())),
            )
            .filter(Column::Id.eq(district_id))
            .filter(
                Condition::any()
                    .add(Column::SyncLeaseOwner.is_null())
                    .add(Column::SyncLeaseOwner.eq(owner))
                    .add(Column::SyncLeaseExpiresAt.lt(now.fixed_offset())),
            )
            .exec(self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Pushes the lease expiry to now + `ttl` while `owner` still holds it.
    ///
    /// Returns `false` when the lease has been taken over.
    pub async fn renew_lease(
        &self,
        district_id: Uuid,
        owner: Uuid,
        ttl: Duration,
    ) -> Result<bool, DbErr> {
        let expires_at = (Utc::now() + ttl).fixed_offset();
        let result = District::update_many()
            .col_expr(Column::SyncLeaseExpiresAt, Expr::value(Some(expires_at)))
            .filter(Column::Id.eq(district_id))
            .filter(Column::SyncLeaseOwner.eq(owner))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Clears the lease if `owner` still holds it.
    pub async fn release_lease(&self, district_id: Uuid, owner: Uuid) -> Result<(), DbErr> {
        District::update_many()
            .col_expr(Column::SyncLeaseOwner, Expr::value(Option::<Uuid>::None))
            .col_expr(
                Column::SyncLeaseExpiresAt,
                Expr::value(Option::<chrono::DateTime<chrono::FixedOffset>>::None),
            )
            .filter(Column::Id.eq(district_id))
            .filter(Column::SyncLeaseOwner.eq(owner))
            .exec(self.db)
            .await?;
        Ok(())
    }

    /// Ids of districts with a live lease (used by health reporting and tests).
    pub async fn leased_district_ids(&self) -> Result<Vec<Uuid>, DbErr> {
        let now = Utc::now().fixed_offset();
        let rows = District::find()
            .filter(Column::SyncLeaseOwner.is_not_null())
            .filter(Column::SyncLeaseExpiresAt.gt(now))
            .all(self.db)
            .await?;
        Ok(rows.into_iter().map(|d| d.id).collect())
    }
}

/// `settings.sisCredentials`; `Ok(None)` when absent.
pub fn sis_credentials(settings: &JsonValue) -> Result<Option<SisCredentials>, serde_json::Error> {
    match settings.get("sisCredentials") {
        None | Some(JsonValue::Null) => Ok(None),
        Some(raw) => serde_json::from_value(raw.clone()).map(Some),
    }
}

/// `settings.sisSchoolIds` allow-list; ids may be strings or numbers.
pub fn school_allow_list(settings: &JsonValue) -> Option<Vec<String>> {
    let ids = settings.get("sisSchoolIds")?.as_array()?;
    Some(
        ids.iter()
            .filter_map(|id| match id {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
    )
}

/// `featureFlags.sis.lastSync`, if present and parseable.
pub fn last_sync(feature_flags: &JsonValue) -> Option<DateTime<Utc>> {
    feature_flags
        .get("sis")?
        .get("lastSync")?
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_settings_shapes() {
        let settings = json!({
            "sisCredentials": {
                "vendor": "powerschool",
                "baseUrl": "https://ps.example.org",
                "authType": "basic",
                "clientId": "u",
                "clientSecret": "p"
            },
            "sisSchoolIds": ["100", 200, null]
        });
        let creds = sis_credentials(&settings).unwrap().unwrap();
        assert_eq!(creds.vendor, "powerschool");
        assert_eq!(school_allow_list(&settings), Some(vec!["100".to_string(), "200".to_string()]));
        assert_eq!(sis_credentials(&json!({})).unwrap(), None);
        assert!(sis_credentials(&json!({"sisCredentials": {"vendor": 1}})).is_err());
    }

    #[test]
    fn last_sync_is_parsed_from_flags() {
        let flags = json!({"sis": {"lastSync": "2026-10-01T08:00:00+00:00"}});
        assert_eq!(
            last_sync(&flags).map(|at| at.to_rfc3339()),
            Some("2026-10-01T08:00:00+00:00".to_string())
        );
        assert_eq!(last_sync(&json!({"sis": {}})), None);
    }
}
