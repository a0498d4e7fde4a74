//! # Sync Orchestrator
//!
//! Runs one district sync end to end: loads the district's SIS credentials,
//! takes the district lease, builds and authenticates a connector, walks the
//! vendor (incrementally through the change feed or in full), persists the
//! directory graph and records the run.
//!
//! ```text
//! Pending -> Authenticating -> IncrementalWalk | FullWalk -> Persisting -> Completed
//!                                                                        \-> Failed
//! ```
//!
//! Per-entity problems end up in the returned [`SyncResult`]; only
//! infrastructure failures are returned as [`SyncJobError`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, DbErr, TransactionTrait};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{AppConfig, SyncPolicyConfig, WorkerConfig};
use crate::connectors::{
    ChangeOperation, ChangeRecord, ConnectorError, ConnectorFactory, EntityType, RawEnrollment,
    RawGuardian, RawStudent, SisConnector, SisCredentials, SisVendor, SyncHandler, SyncOptions,
    SyncProgress, SyncResult,
};
use crate::models::district::Model as DistrictModel;
use crate::normalization::{DistrictSyncPolicy, Normalizer, UserRole};
use crate::queue::{JobOptions, QueueError, WorkQueue};
use crate::repositories::audit_log;
use crate::repositories::directory::{self, UpsertOutcome};
use crate::repositories::district::{self, DistrictRepository};

/// Queue job name for full syncs.
pub const JOB_FULL_SYNC: &str = "sis-sync";
/// Queue job name for incremental syncs.
pub const JOB_INCREMENTAL_SYNC: &str = "sis-incremental-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Full,
    Incremental,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            _ => None,
        }
    }

    /// Queue priority; lower runs first.
    pub fn priority(&self) -> i16 {
        match self {
            Self::Full => 1,
            Self::Incremental => 5,
        }
    }

    pub fn job_name(&self) -> &'static str {
        match self {
            Self::Full => JOB_FULL_SYNC,
            Self::Incremental => JOB_INCREMENTAL_SYNC,
        }
    }

    /// Time until the next recommended run of this kind.
    pub fn recommended_interval(&self, policy: &SyncPolicyConfig) -> chrono::Duration {
        match self {
            Self::Full => chrono::Duration::minutes(policy.full_sync_interval_minutes),
            Self::Incremental => chrono::Duration::minutes(policy.incremental_sync_interval_minutes),
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue payload for one district sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub district_id: Uuid,
    pub sync_type: SyncType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    pub fn new(district_id: Uuid, sync_type: SyncType) -> Self {
        Self {
            district_id,
            sync_type,
            scheduled_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Pending,
    Authenticating,
    IncrementalWalk,
    FullWalk,
    Persisting,
    Completed,
    Failed,
}

/// Failures that abort a sync run.
#[derive(Debug, Error)]
pub enum SyncJobError {
    #[error("district {0} not found")]
    DistrictNotFound(Uuid),

    #[error("district {0} has no SIS credentials configured")]
    MissingCredentials(Uuid),

    #[error("district {district_id} has invalid SIS credentials: {details}")]
    InvalidCredentials { district_id: Uuid, details: String },

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("district {0} is already being synced")]
    LeaseHeld(Uuid),

    #[error("sync lease for district {0} was lost")]
    LeaseLost(Uuid),

    #[error("sync of district {0} was cancelled")]
    Cancelled(Uuid),

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl SyncJobError {
    /// Whether a queue-level retry could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DistrictNotFound(_)
            | Self::MissingCredentials(_)
            | Self::InvalidCredentials { .. } => false,
            Self::Connector(err) => err.is_retryable(),
            Self::LeaseHeld(_)
            | Self::LeaseLost(_)
            | Self::Cancelled(_)
            | Self::Database(_)
            | Self::Queue(_) => true,
        }
    }
}

/// What `schedule_sync` did with the request.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    Enqueued { job_id: Uuid },
    Executed(SyncResult),
}

/// Logs every state change of one run.
struct StateTracker {
    district_id: Uuid,
    state: SyncState,
}

impl StateTracker {
    fn new(district_id: Uuid) -> Self {
        debug!(%district_id, state = ?SyncState::Pending, "sync state");
        Self {
            district_id,
            state: SyncState::Pending,
        }
    }

    fn transition(&mut self, next: SyncState) {
        info!(
            district_id = %self.district_id,
            from = ?self.state,
            to = ?next,
            "sync state transition"
        );
        self.state = next;
    }
}

pub struct SyncOrchestrator {
    db: DatabaseConnection,
    factory: ConnectorFactory,
    queue: Option<Arc<dyn WorkQueue>>,
    policy: SyncPolicyConfig,
    worker: WorkerConfig,
}

impl SyncOrchestrator {
    /// Orchestrator without a queue; `schedule_sync` runs inline.
    pub fn new(db: DatabaseConnection, config: &AppConfig) -> Self {
        Self {
            db,
            factory: ConnectorFactory::new(config.client.clone()),
            queue: None,
            policy: config.sync.clone(),
            worker: config.worker.clone(),
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn has_queue(&self) -> bool {
        self.queue.is_some()
    }

    /// Queue options for a sync of this kind.
    pub fn job_options(&self, sync_type: SyncType) -> JobOptions {
        JobOptions {
            priority: sync_type.priority(),
            attempts: self.worker.queue_attempts,
            backoff: Duration::from_millis(self.worker.queue_backoff_ms),
        }
    }

    /// Enqueues a sync, or runs it now when no queue is configured.
    #[instrument(skip(self))]
    pub async fn schedule_sync(
        &self,
        district_id: Uuid,
        sync_type: SyncType,
    ) -> Result<ScheduleOutcome, SyncJobError> {
        let job = SyncJob::new(district_id, sync_type);
        match &self.queue {
            Some(queue) => {
                let job_id = queue
                    .add(sync_type.job_name(), &job, self.job_options(sync_type))
                    .await?;
                Ok(ScheduleOutcome::Enqueued { job_id })
            }
            None => {
                info!(%district_id, %sync_type, "No queue configured, running sync inline");
                Ok(ScheduleOutcome::Executed(self.execute_sync(&job).await?))
            }
        }
    }

    pub async fn execute_sync(&self, job: &SyncJob) -> Result<SyncResult, SyncJobError> {
        self.execute_sync_with_cancellation(job, CancellationToken::new())
            .await
    }

    /// Runs one sync; `cancel` is checked between changes, pages and students.
    #[instrument(skip(self, cancel), fields(district_id = %job.district_id, sync_type = %job.sync_type))]
    pub async fn execute_sync_with_cancellation(
        &self,
        job: &SyncJob,
        cancel: CancellationToken,
    ) -> Result<SyncResult, SyncJobError> {
        let started_at = Utc::now();
        let mut tracker = StateTracker::new(job.district_id);
        let outcome = self.run(job, started_at, cancel, &mut tracker).await;

        let labels = vec![("sync_type", job.sync_type.as_str().to_string())];
        match &outcome {
            Ok(result) => {
                tracker.transition(SyncState::Completed);
                counter!("sis_sync_runs_total", &labels).increment(1);
                histogram!("sis_sync_run_duration_ms", &labels).record(result.duration_ms as f64);
                info!(
                    success = result.success,
                    students = result.stats.students,
                    created = result.stats.created,
                    updated = result.stats.updated,
                    errors = result.stats.errors,
                    duration_ms = result.duration_ms,
                    "Sync finished"
                );
            }
            Err(err) => {
                tracker.transition(SyncState::Failed);
                counter!("sis_sync_failures_total", &labels).increment(1);
                warn!(error = %err, retryable = err.is_retryable(), "Sync aborted");
            }
        }
        outcome
    }

    async fn run(
        &self,
        job: &SyncJob,
        started_at: DateTime<Utc>,
        cancel: CancellationToken,
        tracker: &mut StateTracker,
    ) -> Result<SyncResult, SyncJobError> {
        let districts = DistrictRepository::new(&self.db);
        let (district, credentials) = self.load_district(&districts, job.district_id).await?;

        let owner = Uuid::new_v4();
        let ttl = chrono::Duration::seconds(self.policy.lease_ttl_seconds as i64);
        if !districts.acquire_lease(district.id, owner, ttl).await? {
            return Err(SyncJobError::LeaseHeld(district.id));
        }

        // Renewal failure stops the walk at its next checkpoint
        let walk_cancel = cancel.child_token();
        let work = self.run_leased(
            &district,
            &credentials,
            job,
            started_at,
            walk_cancel.clone(),
            tracker,
        );
        tokio::pin!(work);
        let outcome = tokio::select! {
            outcome = &mut work => outcome,
            lost = self.hold_lease(district.id, owner, ttl) => {
                warn!(district_id = %district.id, error = %lost, "Sync lease renewal failed, aborting");
                walk_cancel.cancel();
                let _ = work.await;
                Err(lost)
            }
        };
        if let Err(err) = districts.release_lease(district.id, owner).await {
            warn!(district_id = %district.id, error = %err, "Failed to release sync lease");
        }
        outcome
    }

    /// Extends the lease every third of its TTL. Only returns once renewal
    /// fails.
    async fn hold_lease(&self, district_id: Uuid, owner: Uuid, ttl: chrono::Duration) -> SyncJobError {
        let every = (ttl / 3)
            .to_std()
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_millis(50));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        let districts = DistrictRepository::new(&self.db);
        loop {
            ticker.tick().await;
            match districts.renew_lease(district_id, owner, ttl).await {
                Ok(true) => debug!(%district_id, "Sync lease renewed"),
                Ok(false) => return SyncJobError::LeaseLost(district_id),
                Err(err) => return SyncJobError::Database(err),
            }
        }
    }

    async fn load_district(
        &self,
        districts: &DistrictRepository<'_>,
        district_id: Uuid,
    ) -> Result<(DistrictModel, SisCredentials), SyncJobError> {
        let district = districts
            .find(district_id)
            .await?
            .ok_or(SyncJobError::DistrictNotFound(district_id))?;

        let credentials = district::sis_credentials(&district.settings)
            .map_err(|err| SyncJobError::InvalidCredentials {
                district_id,
                details: err.to_string(),
            })?
            .ok_or(SyncJobError::MissingCredentials(district_id))?;
        credentials
            .validate()
            .map_err(|err| SyncJobError::InvalidCredentials {
                district_id,
                details: err.to_string(),
            })?;

        Ok((district, credentials))
    }

    async fn run_leased(
        &self,
        district: &DistrictModel,
        credentials: &SisCredentials,
        job: &SyncJob,
        started_at: DateTime<Utc>,
        cancel: CancellationToken,
        tracker: &mut StateTracker,
    ) -> Result<SyncResult, SyncJobError> {
        tracker.transition(SyncState::Authenticating);
        let connector = self.factory.build(credentials)?;
        connector.authenticate().await?;
        let vendor = connector.vendor();

        let context = PersistContext {
            db: &self.db,
            normalizer: Normalizer::new(DistrictSyncPolicy::from_settings(&district.settings)),
            vendor,
            district_id: district.id,
        };

        let last_sync = district::last_sync(&district.feature_flags);
        let mut result = match (job.sync_type, last_sync) {
            (SyncType::Incremental, Some(since)) => {
                tracker.transition(SyncState::IncrementalWalk);
                self.incremental_walk(connector.as_ref(), &context, since, &cancel)
                    .await?
            }
            (sync_type, _) => {
                if sync_type == SyncType::Incremental {
                    info!(district_id = %district.id, "No recorded lastSync, falling back to a full walk");
                }
                tracker.transition(SyncState::FullWalk);
                let options = SyncOptions {
                    school_ids: district::school_allow_list(&district.settings),
                    page_size: self.policy.page_size,
                    cancellation: Some(cancel.child_token()),
                    ..SyncOptions::default()
                };
                self.full_walk(connector.as_ref(), &context, &options).await?
            }
        };

        // A partial walk must not advance lastSync
        if cancel.is_cancelled() {
            info!(
                district_id = %district.id,
                students = result.stats.students,
                "Sync cancelled before the walk finished"
            );
            return Err(SyncJobError::Cancelled(district.id));
        }

        tracker.transition(SyncState::Persisting);
        let districts = DistrictRepository::new(&self.db);
        districts.set_last_sync(district.id, started_at).await?;
        result.next_sync_recommended_at =
            Some(Utc::now() + job.sync_type.recommended_interval(&self.policy));
        audit_log::record_sync(&self.db, district.id, vendor, job.sync_type.as_str(), &result)
            .await?;

        Ok(result)
    }

    async fn full_walk(
        &self,
        connector: &dyn SisConnector,
        context: &PersistContext<'_>,
        options: &SyncOptions,
    ) -> Result<SyncResult, SyncJobError> {
        let stop = options.cancellation.clone().unwrap_or_default();
        let mut handler = PersistHandler::new(context, stop);
        let mut result = connector
            .sync_district(context.district_id, options, &mut handler)
            .await;
        if let Some(err) = handler.connection_lost {
            return Err(SyncJobError::Database(err));
        }
        result.stats.created += handler.created;
        result.stats.updated += handler.updated;
        Ok(result)
    }

    async fn incremental_walk(
        &self,
        connector: &dyn SisConnector,
        context: &PersistContext<'_>,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, SyncJobError> {
        // A feed we could not read would silently lose changes once lastSync advances.
        let changes = connector.get_changes(since, None).await?;
        info!(district_id = %context.district_id, %since, changes = changes.len(), "Walking change feed");

        let mut progress = SyncProgress::new();
        for change in &changes {
            if cancel.is_cancelled() {
                progress.record_error("sync", context.district_id.to_string(), "sync cancelled");
                break;
            }
            progress.stats.changes += 1;
            if let Err(err) = apply_change(connector, context, change, &mut progress).await {
                if is_connection_error(&err) {
                    return Err(into_db_err(err).into());
                }
                progress.record_error(change.entity_type.as_str(), change.entity_id.clone(), format!("{err:#}"));
            }
        }
        Ok(progress.finish())
    }
}

/// Everything a write needs to know about the current run.
struct PersistContext<'a> {
    db: &'a DatabaseConnection,
    normalizer: Normalizer,
    vendor: SisVendor,
    district_id: Uuid,
}

impl PersistContext<'_> {
    async fn persist_student(&self, raw: &RawStudent) -> anyhow::Result<UpsertOutcome> {
        let user = self
            .normalizer
            .normalize_student(self.vendor, raw, self.district_id)?;
        let txn = self.db.begin().await?;
        let outcome = directory::upsert_user(&txn, &user).await?;
        txn.commit().await?;
        Ok(outcome)
    }

    async fn persist_guardian(&self, raw: &RawGuardian) -> anyhow::Result<UpsertOutcome> {
        let user = self
            .normalizer
            .normalize_guardian(self.vendor, raw, self.district_id)?;
        let txn = self.db.begin().await?;
        let outcome = directory::upsert_user(&txn, &user).await?;
        txn.commit().await?;
        Ok(outcome)
    }

    /// Returns the student's user id.
    async fn persist_enrollment(&self, raw: &RawEnrollment) -> anyhow::Result<Uuid> {
        let enrollment = self
            .normalizer
            .normalize_enrollment(self.vendor, raw, self.district_id)?;
        let txn = self.db.begin().await?;
        let applied = directory::apply_enrollment(&txn, &enrollment).await?;
        txn.commit().await?;
        applied.ok_or_else(|| anyhow!("student {} has not been synced", raw.student_id))
    }

    async fn persist_relationship(
        &self,
        raw: &RawGuardian,
        student_user_id: Uuid,
        guardian_user_id: Uuid,
    ) -> anyhow::Result<UpsertOutcome> {
        let edge = self.normalizer.normalize_relationship(
            self.vendor,
            raw,
            self.district_id,
            student_user_id,
            guardian_user_id,
        );
        let txn = self.db.begin().await?;
        let outcome = directory::upsert_relationship(&txn, &edge).await?;
        txn.commit().await?;
        Ok(outcome)
    }

    async fn deactivate(&self, sis_id: &str, role: UserRole) -> anyhow::Result<bool> {
        let txn = self.db.begin().await?;
        let found = directory::deactivate_user(&txn, self.district_id, sis_id, role).await?;
        txn.commit().await?;
        Ok(found)
    }
}

/// The database itself is unreachable, as opposed to one record being refused.
fn is_connection_error(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<DbErr>(),
        Some(DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
    )
}

fn into_db_err(err: anyhow::Error) -> DbErr {
    err.downcast::<DbErr>()
        .unwrap_or_else(|other| DbErr::Custom(format!("{other:#}")))
}

fn count(progress: &mut SyncProgress, outcome: UpsertOutcome) {
    if outcome.is_created() {
        progress.stats.created += 1;
    } else {
        progress.stats.updated += 1;
    }
}

/// Re-fetches and persists one change-feed entry.
async fn apply_change(
    connector: &dyn SisConnector,
    context: &PersistContext<'_>,
    change: &ChangeRecord,
    progress: &mut SyncProgress,
) -> anyhow::Result<()> {
    let id = change.entity_id.as_str();
    match (change.entity_type, change.operation) {
        (EntityType::Student, ChangeOperation::Deleted) => {
            if context.deactivate(id, UserRole::Student).await? {
                progress.stats.updated += 1;
            } else {
                progress.stats.skipped += 1;
            }
        }
        (EntityType::Guardian, ChangeOperation::Deleted) => {
            if context.deactivate(id, UserRole::Guardian).await? {
                progress.stats.updated += 1;
            } else {
                progress.stats.skipped += 1;
            }
        }
        (EntityType::Student, _) => {
            let raw = connector
                .get_student(id)
                .await
                .with_context(|| format!("re-fetching student {id}"))?;
            let outcome = context.persist_student(&raw).await?;
            progress.stats.students += 1;
            count(progress, outcome);
        }
        (EntityType::Guardian, _) => {
            let raw = connector
                .get_guardian(id)
                .await
                .with_context(|| format!("re-fetching guardian {id}"))?;
            let outcome = context.persist_guardian(&raw).await?;
            progress.stats.guardians += 1;
            count(progress, outcome);
        }
        (EntityType::Enrollment, ChangeOperation::Deleted) => {
            debug!(enrollment_id = id, "Enrollment deletion has no directory effect");
            progress.stats.skipped += 1;
        }
        (EntityType::Enrollment, _) => {
            let raw = connector
                .get_enrollment(id)
                .await
                .with_context(|| format!("re-fetching enrollment {id}"))?;
            context.persist_enrollment(&raw).await?;
            progress.stats.enrollments += 1;
            progress.stats.updated += 1;
        }
        (entity_type, _) => {
            debug!(%entity_type, entity_id = id, "Change type not persisted, skipping");
            progress.stats.skipped += 1;
        }
    }
    Ok(())
}

/// Persists records as the district walk produces them, one transaction per entity.
///
/// Losing the database connection cancels `stop` so the walk ends instead of
/// recording every remaining record as failed.
struct PersistHandler<'a, 'b> {
    context: &'a PersistContext<'b>,
    stop: CancellationToken,
    /// sis id -> user id for this run
    students: HashMap<String, Uuid>,
    guardians: HashMap<String, Uuid>,
    created: u64,
    updated: u64,
    connection_lost: Option<DbErr>,
}

impl<'a, 'b> PersistHandler<'a, 'b> {
    fn new(context: &'a PersistContext<'b>, stop: CancellationToken) -> Self {
        Self {
            context,
            stop,
            students: HashMap::new(),
            guardians: HashMap::new(),
            created: 0,
            updated: 0,
            connection_lost: None,
        }
    }

    fn check<T>(&mut self, persisted: anyhow::Result<T>) -> anyhow::Result<T> {
        match persisted {
            Err(err) if is_connection_error(&err) => {
                let message = format!("database unavailable: {err:#}");
                self.stop.cancel();
                if self.connection_lost.is_none() {
                    self.connection_lost = Some(into_db_err(err));
                }
                Err(anyhow!(message))
            }
            other => other,
        }
    }

    fn tally(&mut self, outcome: UpsertOutcome) -> Uuid {
        if outcome.is_created() {
            self.created += 1;
        } else {
            self.updated += 1;
        }
        outcome.id()
    }
}

#[async_trait]
impl SyncHandler for PersistHandler<'_, '_> {
    async fn on_student(&mut self, student: &RawStudent) -> anyhow::Result<()> {
        let persisted = self.context.persist_student(student).await;
        let outcome = self.check(persisted)?;
        let user_id = self.tally(outcome);
        self.students.insert(student.external_id.clone(), user_id);
        Ok(())
    }

    async fn on_enrollment(
        &mut self,
        _student: &RawStudent,
        enrollment: &RawEnrollment,
    ) -> anyhow::Result<()> {
        let persisted = self.context.persist_enrollment(enrollment).await;
        self.check(persisted)?;
        self.updated += 1;
        Ok(())
    }

    async fn on_guardian(
        &mut self,
        _student: &RawStudent,
        guardian: &RawGuardian,
    ) -> anyhow::Result<()> {
        let persisted = self.context.persist_guardian(guardian).await;
        let outcome = self.check(persisted)?;
        let user_id = self.tally(outcome);
        self.guardians.insert(guardian.external_id.clone(), user_id);
        Ok(())
    }

    async fn on_relationship(
        &mut self,
        student: &RawStudent,
        guardian: &RawGuardian,
    ) -> anyhow::Result<()> {
        let student_user_id = *self
            .students
            .get(&student.external_id)
            .ok_or_else(|| anyhow!("student {} was not persisted", student.external_id))?;
        let guardian_user_id = *self
            .guardians
            .get(&guardian.external_id)
            .ok_or_else(|| anyhow!("guardian {} was not persisted", guardian.external_id))?;
        let persisted = self
            .context
            .persist_relationship(guardian, student_user_id, guardian_user_id)
            .await;
        let outcome = self.check(persisted)?;
        self.tally(outcome);
        Ok(())
    }
}
