//! # Sync Scheduler
//!
//! Registers recurring incremental syncs per district and runs the loop that
//! promotes due registrations into queue jobs.
//!
//! Registration is idempotent: a registration is identified by its repeat key
//! (SHA-256 of job name, cron expression and payload), so registering the same
//! district twice leaves one row. A promotion is skipped while a job produced
//! by the same registration is still queued or running.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::repeatable_job::{self, Entity as RepeatableJob};
use crate::queue::{self, DbWorkQueue, JobOptions, QueueError, Registration, WorkQueue};
use crate::repositories::DistrictRepository;
use crate::sync_orchestrator::{SyncJob, SyncType};

/// Background scheduler service.
pub struct SyncScheduler {
    config: Arc<AppConfig>,
    db: DatabaseConnection,
    queue: Arc<DbWorkQueue>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub due: u64,
    pub enqueued: u64,
    pub skipped_pending: u64,
    pub errors: u64,
}

impl SyncScheduler {
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection, queue: Arc<DbWorkQueue>) -> Self {
        Self { config, db, queue }
    }

    fn incremental_options(&self) -> JobOptions {
        JobOptions {
            priority: SyncType::Incremental.priority(),
            attempts: self.config.worker.queue_attempts,
            backoff: std::time::Duration::from_millis(self.config.worker.queue_backoff_ms),
        }
    }

    /// Registers the recurring incremental sync for one district.
    pub async fn register_incremental(&self, district_id: Uuid) -> Result<Registration, QueueError> {
        let job = SyncJob {
            district_id,
            sync_type: SyncType::Incremental,
            scheduled_at: None,
        };
        let registration = self
            .queue
            .add_repeatable(
                SyncType::Incremental.job_name(),
                &job,
                &self.config.scheduler.incremental_cron,
                self.incremental_options(),
            )
            .await?;
        if registration.created {
            info!(
                district_id = %district_id,
                repeat_key = %registration.repeat_key,
                next_run_at = %registration.next_run_at,
                "Registered incremental sync"
            );
        }
        Ok(registration)
    }

    /// Registers every district that has SIS credentials. Returns the number of
    /// new registrations.
    #[instrument(skip_all)]
    pub async fn register_all(&self) -> Result<usize, QueueError> {
        let districts = DistrictRepository::new(&self.db)
            .list_with_credentials()
            .await?;
        let mut created = 0;
        for district in &districts {
            if self.register_incremental(district.id).await?.created {
                created += 1;
            }
        }
        info!(
            districts = districts.len(),
            created, "Incremental sync registrations ensured"
        );
        Ok(created)
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting sync scheduler");
        let tick_interval = TokioDuration::from_secs(self.config.scheduler.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick(Utc::now()).await {
                        error!(error = %err, "Scheduler tick failed");
                    }
                    histogram!("sis_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Promotes every registration due at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickStats, QueueError> {
        let mut stats = TickStats::default();
        let due = RepeatableJob::find()
            .filter(repeatable_job::Column::NextRunAt.lte(now.fixed_offset()))
            .order_by_asc(repeatable_job::Column::NextRunAt)
            .all(&self.db)
            .await?;
        stats.due = due.len() as u64;

        for registration in due {
            let repeat_key = registration.repeat_key.clone();
            if let Err(err) = self.promote(registration, now, &mut stats).await {
                stats.errors += 1;
                error!(error = %err, repeat_key = %repeat_key, "Failed to promote registration");
            }
        }

        gauge!("sis_scheduler_due_registrations").set(stats.due as f64);
        debug!(
            due = stats.due,
            enqueued = stats.enqueued,
            skipped_pending = stats.skipped_pending,
            errors = stats.errors,
            "Scheduler tick completed"
        );
        Ok(stats)
    }

    async fn promote(
        &self,
        registration: repeatable_job::Model,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) -> Result<(), QueueError> {
        let next_run_at = queue::next_run(&registration.cron, now)?;
        let mut active: repeatable_job::ActiveModel = registration.clone().into();
        active.next_run_at = Set(next_run_at.fixed_offset());
        active.updated_at = Set(now.fixed_offset());

        if self.queue.has_pending_for_key(&registration.repeat_key).await? {
            stats.skipped_pending += 1;
            debug!(
                district_id = %registration.district_id,
                "Skipping promotion; previous run still pending"
            );
            active.update(&self.db).await?;
            return Ok(());
        }

        let mut job: SyncJob = match serde_json::from_value(registration.payload.clone()) {
            Ok(job) => job,
            Err(err) => {
                warn!(repeat_key = %registration.repeat_key, error = %err, "Registration payload unreadable");
                active.update(&self.db).await?;
                return Err(err.into());
            }
        };
        job.scheduled_at = Some(now);

        let options = JobOptions {
            priority: registration.priority,
            ..self.incremental_options()
        };
        let job_id = queue::insert_job(
            &self.db,
            &registration.name,
            &job,
            options,
            Some(registration.repeat_key.clone()),
        )
        .await?;

        active.last_enqueued_at = Set(Some(now.fixed_offset()));
        active.update(&self.db).await?;

        stats.enqueued += 1;
        let labels = vec![("sync_type", job.sync_type.as_str().to_string())];
        counter!("sis_scheduler_jobs_enqueued_total", &labels).increment(1);
        info!(
            job_id = %job_id,
            district_id = %job.district_id,
            next_run_at = %next_run_at,
            "Enqueued scheduled sync job"
        );
        Ok(())
    }
}
