//! # Work Queue
//!
//! Durable, database-backed job queue for district syncs.
//!
//! Jobs live in `sync_jobs` and are claimed in priority order (lower value
//! first, then oldest `scheduled_at`). Recurring registrations live in
//! `repeatable_jobs`, deduplicated by a repeat key, and are promoted into
//! `sync_jobs` by the scheduler.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use rand::{Rng, thread_rng};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::{Value as JsonValue, json};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::repeatable_job::{self, Entity as RepeatableJob};
use crate::models::sync_job::{self, Entity as SyncJobEntity};
use crate::sync_orchestrator::SyncJob;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

/// Jitter added on top of queue-level backoff, as a fraction of the delay.
const BACKOFF_JITTER: f64 = 0.1;

/// How long a running job may go without a heartbeat before it is reclaimed.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] DbErr),

    #[error("invalid cron expression '{cron}': {details}")]
    InvalidCron { cron: String, details: String },

    #[error("cron expression '{0}' has no upcoming run")]
    ExhaustedCron(String),

    #[error("failed to encode job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Per-job queue options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Lower runs first
    pub priority: i16,
    /// Total attempts including the first run
    pub attempts: u32,
    /// Base delay of the exponential backoff between attempts
    pub backoff: Duration,
}

/// Result of a recurring registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub repeat_key: String,
    /// `false` when an identical registration already existed
    pub created: bool,
    pub next_run_at: DateTime<Utc>,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retrying { retry_after: DateTime<Utc> },
    Failed,
}

/// Queue contract used by the orchestrator and scheduler.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueues one job; returns its id.
    async fn add(&self, name: &str, job: &SyncJob, options: JobOptions) -> Result<Uuid, QueueError>;

    /// Registers a recurring job. Registering the same name, cron and payload
    /// twice is a no-op.
    async fn add_repeatable(
        &self,
        name: &str,
        job: &SyncJob,
        cron: &str,
        options: JobOptions,
    ) -> Result<Registration, QueueError>;
}

/// SHA-256 over the job name, cron expression and payload options.
pub fn repeat_key(name: &str, cron: &str, payload: &JsonValue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(cron.as_bytes());
    hasher.update(b"\n");
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Parses a six-field (seconds first) cron expression.
pub fn parse_cron(cron: &str) -> Result<Schedule, QueueError> {
    Schedule::from_str(cron).map_err(|err| QueueError::InvalidCron {
        cron: cron.to_string(),
        details: err.to_string(),
    })
}

/// Next fire time strictly after `after`.
pub fn next_run(cron: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
    parse_cron(cron)?
        .after(&after)
        .next()
        .ok_or_else(|| QueueError::ExhaustedCron(cron.to_string()))
}

/// Delay before attempt `attempts + 1`, given `attempts` already made.
pub fn retry_delay(backoff_ms: i64, attempts: i32) -> Duration {
    let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
    let base = (backoff_ms.max(0) as u64).saturating_mul(2u64.saturating_pow(exponent));
    let jitter = if base == 0 {
        0
    } else {
        thread_rng().gen_range(0..=((base as f64 * BACKOFF_JITTER) as u64))
    };
    Duration::from_millis(base.saturating_add(jitter))
}

/// Inserts a queued job row.
pub(crate) async fn insert_job<C: ConnectionTrait>(
    conn: &C,
    name: &str,
    job: &SyncJob,
    options: JobOptions,
    repeat_key: Option<String>,
) -> Result<Uuid, QueueError> {
    let now = Utc::now().fixed_offset();
    let id = Uuid::new_v4();
    let row = sync_job::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        district_id: Set(job.district_id),
        sync_type: Set(job.sync_type.as_str().to_string()),
        payload: Set(serde_json::to_value(job)?),
        status: Set(STATUS_QUEUED.to_string()),
        priority: Set(options.priority),
        attempts: Set(0),
        max_attempts: Set(options.attempts.max(1) as i32),
        backoff_ms: Set(options.backoff.as_millis() as i64),
        repeat_key: Set(repeat_key),
        scheduled_at: Set(job.scheduled_at.map_or(now, |at| at.fixed_offset())),
        retry_after: Set(None),
        started_at: Set(None),
        finished_at: Set(None),
        result: Set(None),
        error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    row.insert(conn).await?;
    Ok(id)
}

/// [`WorkQueue`] backed by the `sync_jobs` and `repeatable_jobs` tables.
///
/// Workers heartbeat running jobs by touching `updated_at`; a running job
/// whose heartbeat is older than `stale_after` belonged to a worker that died
/// and is reclaimed on the next claim.
#[derive(Clone)]
pub struct DbWorkQueue {
    db: DatabaseConnection,
    stale_after: Duration,
}

impl DbWorkQueue {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Option<sync_job::Model>, QueueError> {
        Ok(SyncJobEntity::find_by_id(job_id).one(&self.db).await?)
    }

    /// Claims the next due job, marking it running and counting the attempt.
    pub async fn claim_next(&self) -> Result<Option<sync_job::Model>, QueueError> {
        self.reclaim_stale().await?;
        // Another worker may win the race for a candidate; try the next one.
        for _ in 0..3 {
            let now = Utc::now().fixed_offset();
            let Some(candidate) = SyncJobEntity::find()
                .filter(sync_job::Column::Status.eq(STATUS_QUEUED))
                .filter(sync_job::Column::ScheduledAt.lte(now))
                .filter(
                    sync_job::Column::RetryAfter
                        .is_null()
                        .or(sync_job::Column::RetryAfter.lte(now)),
                )
                .order_by_asc(sync_job::Column::Priority)
                .order_by_asc(sync_job::Column::ScheduledAt)
                .limit(1)
                .one(&self.db)
                .await?
            else {
                return Ok(None);
            };

            let claimed = SyncJobEntity::update_many()
                .col_expr(sync_job::Column::Status, Expr::value(STATUS_RUNNING))
                .col_expr(sync_job::Column::StartedAt, Expr::value(Some(now)))
                .col_expr(
                    sync_job::Column::Attempts,
                    Expr::col(sync_job::Column::Attempts).add(1),
                )
                .col_expr(sync_job::Column::UpdatedAt, Expr::value(now))
                .filter(sync_job::Column::Id.eq(candidate.id))
                .filter(sync_job::Column::Status.eq(STATUS_QUEUED))
                .exec(&self.db)
                .await?;

            if claimed.rows_affected == 1 {
                return self.find(candidate.id).await;
            }
            debug!(job_id = %candidate.id, "Job claimed by another worker");
        }
        Ok(None)
    }

    /// Requeues running jobs whose worker stopped heartbeating. The interrupted
    /// attempt counts; jobs without attempts left are failed.
    pub async fn reclaim_stale(&self) -> Result<u64, QueueError> {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|stale_after| now.checked_sub_signed(stale_after))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .fixed_offset();
        let stale = SyncJobEntity::find()
            .filter(sync_job::Column::Status.eq(STATUS_RUNNING))
            .filter(sync_job::Column::UpdatedAt.lt(cutoff))
            .all(&self.db)
            .await?;

        let mut reclaimed = 0;
        for job in stale {
            let retry = job.attempts < job.max_attempts;
            let status = if retry { STATUS_QUEUED } else { STATUS_FAILED };
            let finished_at = (!retry).then(|| now.fixed_offset());
            let error = json!({
                "message": "worker stopped while the job was running",
                "retryable": true,
                "attempts": job.attempts,
                "timestamp": now.to_rfc3339(),
            });
            let updated = SyncJobEntity::update_many()
                .col_expr(sync_job::Column::Status, Expr::value(status))
                .col_expr(
                    sync_job::Column::StartedAt,
                    Expr::value(Option::<DateTime<FixedOffset>>::None),
                )
                .col_expr(sync_job::Column::FinishedAt, Expr::value(finished_at))
                .col_expr(sync_job::Column::Error, Expr::value(Some(error)))
                .col_expr(sync_job::Column::UpdatedAt, Expr::value(now.fixed_offset()))
                .filter(sync_job::Column::Id.eq(job.id))
                .filter(sync_job::Column::Status.eq(STATUS_RUNNING))
                .filter(sync_job::Column::UpdatedAt.lt(cutoff))
                .exec(&self.db)
                .await?;
            if updated.rows_affected == 1 {
                reclaimed += 1;
                warn!(
                    job_id = %job.id,
                    district_id = %job.district_id,
                    attempt = job.attempts,
                    requeued = retry,
                    "Reclaimed stale running job"
                );
            }
        }
        Ok(reclaimed)
    }

    /// Marks a running job as alive.
    pub async fn heartbeat(&self, job: &sync_job::Model) -> Result<(), QueueError> {
        SyncJobEntity::update_many()
            .col_expr(sync_job::Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(sync_job::Column::Id.eq(job.id))
            .filter(sync_job::Column::Status.eq(STATUS_RUNNING))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Returns a claimed job to the queue without counting the attempt.
    pub async fn release(&self, job: &sync_job::Model) -> Result<(), QueueError> {
        let mut active: sync_job::ActiveModel = job.clone().into();
        active.status = Set(STATUS_QUEUED.to_string());
        active.attempts = Set(job.attempts.saturating_sub(1).max(0));
        active.started_at = Set(None);
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await?;
        info!(job_id = %job.id, district_id = %job.district_id, "Sync job released back to the queue");
        Ok(())
    }

    pub async fn complete(&self, job: &sync_job::Model, result: JsonValue) -> Result<(), QueueError> {
        let now = Utc::now().fixed_offset();
        let mut active: sync_job::ActiveModel = job.clone().into();
        active.status = Set(STATUS_SUCCEEDED.to_string());
        active.finished_at = Set(Some(now));
        active.result = Set(Some(result));
        active.error = Set(None);
        active.updated_at = Set(now);
        active.update(&self.db).await?;
        Ok(())
    }

    /// Records a failed attempt. The job is requeued with backoff while it is
    /// retryable and attempts remain, and marked failed otherwise.
    pub async fn fail(
        &self,
        job: &sync_job::Model,
        message: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, QueueError> {
        let now = Utc::now();
        let mut active: sync_job::ActiveModel = job.clone().into();

        let disposition = if retryable && job.attempts < job.max_attempts {
            let delay = retry_delay(job.backoff_ms, job.attempts);
            let retry_after = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
            active.status = Set(STATUS_QUEUED.to_string());
            active.retry_after = Set(Some(retry_after.fixed_offset()));
            FailureDisposition::Retrying { retry_after }
        } else {
            active.status = Set(STATUS_FAILED.to_string());
            active.finished_at = Set(Some(now.fixed_offset()));
            FailureDisposition::Failed
        };

        active.error = Set(Some(json!({
            "message": message,
            "retryable": retryable,
            "attempts": job.attempts,
            "timestamp": now.to_rfc3339(),
        })));
        active.updated_at = Set(now.fixed_offset());
        active.update(&self.db).await?;

        match disposition {
            FailureDisposition::Retrying { retry_after } => warn!(
                job_id = %job.id,
                attempt = job.attempts,
                %retry_after,
                "Sync job failed, retrying: {}", message
            ),
            FailureDisposition::Failed => warn!(
                job_id = %job.id,
                attempt = job.attempts,
                retryable,
                "Sync job failed permanently: {}", message
            ),
        }
        Ok(disposition)
    }

    /// Whether a job produced by `repeat_key` is still queued or running.
    pub async fn has_pending_for_key(&self, repeat_key: &str) -> Result<bool, QueueError> {
        let pending = SyncJobEntity::find()
            .filter(sync_job::Column::RepeatKey.eq(repeat_key))
            .filter(sync_job::Column::Status.is_in([STATUS_QUEUED, STATUS_RUNNING]))
            .count(&self.db)
            .await?;
        Ok(pending > 0)
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl WorkQueue for DbWorkQueue {
    async fn add(&self, name: &str, job: &SyncJob, options: JobOptions) -> Result<Uuid, QueueError> {
        let job_id = insert_job(&self.db, name, job, options, None).await?;
        info!(
            job_id = %job_id,
            district_id = %job.district_id,
            sync_type = %job.sync_type,
            priority = options.priority,
            "Sync job enqueued"
        );
        Ok(job_id)
    }

    async fn add_repeatable(
        &self,
        name: &str,
        job: &SyncJob,
        cron: &str,
        options: JobOptions,
    ) -> Result<Registration, QueueError> {
        let payload = serde_json::to_value(job)?;
        let key = repeat_key(name, cron, &payload);
        let now = Utc::now();
        let next_run_at = next_run(cron, now)?;

        let row = repeatable_job::ActiveModel {
            id: Set(Uuid::new_v4()),
            repeat_key: Set(key.clone()),
            name: Set(name.to_string()),
            district_id: Set(job.district_id),
            payload: Set(payload),
            cron: Set(cron.to_string()),
            priority: Set(options.priority),
            next_run_at: Set(next_run_at.fixed_offset()),
            last_enqueued_at: Set(None),
            created_at: Set(now.fixed_offset()),
            updated_at: Set(now.fixed_offset()),
        };

        let inserted = RepeatableJob::insert(row)
            .on_conflict(
                OnConflict::column(repeatable_job::Column::RepeatKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await;
        let created = match inserted {
            Ok(rows) => rows > 0,
            Err(DbErr::RecordNotInserted) => false,
            Err(err) => return Err(err.into()),
        };

        let next_run_at = if created {
            next_run_at
        } else {
            RepeatableJob::find()
                .filter(repeatable_job::Column::RepeatKey.eq(key.as_str()))
                .one(&self.db)
                .await?
                .map_or(next_run_at, |existing| existing.next_run_at.with_timezone(&Utc))
        };

        debug!(repeat_key = %key, district_id = %job.district_id, created, "Repeatable job registered");
        Ok(Registration {
            repeat_key: key,
            created,
            next_run_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_key_is_stable_and_option_sensitive() {
        let payload = json!({"districtId": "d1", "syncType": "incremental"});
        let a = repeat_key("sis-incremental-sync", "0 */30 * * * *", &payload);
        let b = repeat_key("sis-incremental-sync", "0 */30 * * * *", &payload);
        let c = repeat_key("sis-incremental-sync", "0 */15 * * * *", &payload);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let first = retry_delay(1_000, 1);
        let second = retry_delay(1_000, 2);
        let third = retry_delay(1_000, 3);
        assert!(first >= Duration::from_millis(1_000) && first <= Duration::from_millis(1_100));
        assert!(second >= Duration::from_millis(2_000) && second <= Duration::from_millis(2_200));
        assert!(third >= Duration::from_millis(4_000) && third <= Duration::from_millis(4_400));
        assert_eq!(retry_delay(0, 5), Duration::ZERO);
    }

    #[test]
    fn cron_next_run_is_after_reference() {
        let at = DateTime::parse_from_rfc3339("2026-10-01T10:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_run("0 */30 * * * *", at).unwrap();
        assert_eq!(next.to_rfc3339(), "2026-10-01T10:30:00+00:00");
        assert!(matches!(
            parse_cron("not a cron"),
            Err(QueueError::InvalidCron { .. })
        ));
    }
}
