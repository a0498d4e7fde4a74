//! Sync Executor
//!
//! Background worker that claims due sync jobs from the queue, runs them
//! through the [`SyncOrchestrator`] with bounded concurrency, and records the
//! outcome. Failed attempts are requeued with backoff only when the error is
//! retryable.
//!
//! Concurrency is a pool of `concurrency` slots: a job is claimed whenever a
//! slot is free, so one slow district never holds back the others.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::WorkerConfig;
use crate::models::sync_job;
use crate::queue::{DbWorkQueue, FailureDisposition, QueueError};
use crate::sync_orchestrator::{SyncJob, SyncJobError, SyncOrchestrator};

/// Sync executor responsible for running queued sync jobs
#[derive(Clone)]
pub struct SyncExecutor {
    orchestrator: Arc<SyncOrchestrator>,
    queue: Arc<DbWorkQueue>,
    config: WorkerConfig,
    slots: Arc<Semaphore>,
}

impl SyncExecutor {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        queue: Arc<DbWorkQueue>,
        config: WorkerConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            orchestrator,
            queue,
            config,
            slots,
        }
    }

    /// Get the executor configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Slots not currently running a job.
    pub fn idle_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run the executor loop until `shutdown` fires.
    ///
    /// Jobs still running at shutdown observe the same token and stop between
    /// students; the loop waits for them before returning.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(concurrency = self.config.concurrency, "Starting sync executor");
        let idle = Duration::from_millis(self.config.poll_interval_ms);
        let mut tasks = JoinSet::new();

        loop {
            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    error!("Sync job task panicked: {}", e);
                }
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Executor semaphore closed");
                        break;
                    }
                },
            };

            match self.queue.claim_next().await {
                Ok(Some(job)) => {
                    debug!(job_id = %job.id, idle_slots = self.idle_slots(), "Claimed sync job");
                    self.spawn_job(&mut tasks, job, permit, shutdown.clone());
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!("Error claiming sync job: {}", e),
            }

            // Nothing due: give the slot back and wait for the next poll
            drop(permit);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(idle) => {}
            }
        }

        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("Sync job task panicked: {}", e);
            }
        }
        info!("Sync executor stopped");
    }

    /// Claims due jobs while slots are free, runs them and waits for all of
    /// them. Used for one-shot draining; the long-running loop is [`Self::run`].
    #[instrument(skip_all, fields(concurrency = self.config.concurrency))]
    pub async fn claim_and_run_jobs(&self, cancel: CancellationToken) -> Result<usize, QueueError> {
        let timer = std::time::Instant::now();
        let mut tasks = JoinSet::new();
        let mut claim_error = None;

        while let Ok(permit) = self.slots.clone().try_acquire_owned() {
            match self.queue.claim_next().await {
                Ok(Some(job)) => self.spawn_job(&mut tasks, job, permit, cancel.clone()),
                Ok(None) => break,
                Err(e) => {
                    claim_error = Some(e);
                    break;
                }
            }
        }

        let count = tasks.len();
        if count > 0 {
            info!("Claimed {} jobs for execution", count);
        }
        // Dropping the set would abort jobs that are already running
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("Sync job task panicked: {}", e);
            }
        }
        if let Some(e) = claim_error {
            if count == 0 {
                return Err(e);
            }
            error!("Error claiming sync job: {}", e);
        }
        if count == 0 {
            return Ok(0);
        }

        info!("Completed {} jobs in {:.2}s", count, timer.elapsed().as_secs_f64());
        Ok(count)
    }

    fn spawn_job(
        &self,
        tasks: &mut JoinSet<()>,
        job: sync_job::Model,
        permit: OwnedSemaphorePermit,
        cancel: CancellationToken,
    ) {
        let executor = self.clone();
        tasks.spawn(async move {
            let _permit = permit;
            if let Err(e) = executor.run_single_job(job, cancel).await {
                error!("Error recording job outcome: {}", e);
            }
        });
    }

    /// Run a single claimed job and record its outcome in the queue.
    ///
    /// The job is heartbeated while it runs so the queue does not reclaim it.
    #[instrument(skip(self, job, cancel), fields(job_id = %job.id, district_id = %job.district_id, attempt = job.attempts))]
    pub async fn run_single_job(
        &self,
        job: sync_job::Model,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        let payload: SyncJob = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Job {} has an unreadable payload: {}", job.id, e);
                self.queue
                    .fail(&job, &format!("invalid job payload: {e}"), false)
                    .await?;
                return Ok(());
            }
        };

        info!("Starting sync job {} (attempt {})", job.id, job.attempts);
        let timer = std::time::Instant::now();
        let sync = self
            .orchestrator
            .execute_sync_with_cancellation(&payload, cancel);
        tokio::pin!(sync);
        let every = (self.queue.stale_after() / 3).max(Duration::from_millis(10));
        let mut heartbeat = interval_at(Instant::now() + every, every);
        let outcome = loop {
            tokio::select! {
                outcome = &mut sync => break outcome,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.queue.heartbeat(&job).await {
                        warn!("Failed to heartbeat job {}: {}", job.id, e);
                    }
                }
            }
        };
        histogram!("sis_sync_executor_job_ms").record(timer.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            Ok(result) => {
                let labels = vec![("outcome", if result.success { "success" } else { "partial" }.to_string())];
                counter!("sis_sync_jobs_completed_total", &labels).increment(1);
                self.queue
                    .complete(&job, serde_json::to_value(&result)?)
                    .await?;
                info!(
                    "Completed job {} with {} errors",
                    job.id,
                    result.errors.len()
                );
            }
            Err(SyncJobError::Cancelled(_)) => {
                // Shutdown, not a failure: the next worker starts over
                self.queue.release(&job).await?;
                let labels = vec![("outcome", "released".to_string())];
                counter!("sis_sync_jobs_failed_total", &labels).increment(1);
            }
            Err(e) => {
                let disposition = self.queue.fail(&job, &e.to_string(), e.is_retryable()).await?;
                let outcome = match disposition {
                    FailureDisposition::Retrying { .. } => "retrying",
                    FailureDisposition::Failed => "failed",
                };
                let labels = vec![("outcome", outcome.to_string())];
                counter!("sis_sync_jobs_failed_total", &labels).increment(1);
            }
        }
        Ok(())
    }
}
