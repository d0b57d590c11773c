/// Scheduling gateway
///
/// Turns a validated work item (a scheduled post, or a flow run) into a delayed,
/// retryable job on the injected queue backend. Enqueue failures are returned to
/// the caller as-is; the gateway never retries them itself. Execution retries are
/// configured on the job and carried out by the worker side of the queue.

use crate::scheduling::job::{JobId, JobPayload, JobStatus, NewJob, RetryPolicy};
use crate::scheduling::queue::{JobQueue, QueueResult};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Delay until `scheduled_at`, clamped to zero for instants in the past
pub fn delay_until(scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (scheduled_at - now).max(Duration::zero())
}

/// Read-only projection of job lifecycle state for polling clients
#[derive(Clone)]
pub struct JobStatusReader {
    queue: Arc<dyn JobQueue>,
}

impl JobStatusReader {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Status snapshot of a job, or `None` for unknown ids
    pub async fn get_status(&self, job_id: &JobId) -> QueueResult<Option<JobStatus>> {
        self.get_status_at(job_id, Utc::now()).await
    }

    /// Status snapshot as observed at `now`
    pub async fn get_status_at(&self, job_id: &JobId, now: DateTime<Utc>) -> QueueResult<Option<JobStatus>> {
        let record = self.queue.get(job_id).await?;
        Ok(record.map(|record| record.status_at(now)))
    }
}

/// Entry point for scheduling, cancelling, and inspecting jobs
///
/// Constructed once at start-up around the shared queue backend.
#[derive(Clone)]
pub struct SchedulingGateway {
    queue: Arc<dyn JobQueue>,
    status: JobStatusReader,
    retry: RetryPolicy,
}

impl SchedulingGateway {
    /// Create a gateway over the shared queue with the default retry policy
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            status: JobStatusReader::new(Arc::clone(&queue)),
            queue,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy applied to new jobs
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Status reader sharing this gateway's queue
    pub fn status_reader(&self) -> &JobStatusReader {
        &self.status
    }

    /// Schedule a work item to run no earlier than `scheduled_at`
    ///
    /// Returns the deterministic job id. Scheduling the same work item again while
    /// its job is live returns the same id without creating a second job.
    pub async fn schedule(
        &self,
        work_item_id: &str,
        tenant_id: &str,
        target: &str,
        scheduled_at: DateTime<Utc>,
    ) -> QueueResult<JobId> {
        self.schedule_at(work_item_id, tenant_id, target, scheduled_at, Utc::now()).await
    }

    /// Schedule relative to an explicit `now`
    pub async fn schedule_at(
        &self,
        work_item_id: &str,
        tenant_id: &str,
        target: &str,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<JobId> {
        let delay = delay_until(scheduled_at, now);
        let job = NewJob {
            id: JobId::for_work_item(work_item_id),
            payload: JobPayload {
                work_item_id: work_item_id.to_string(),
                tenant_id: tenant_id.to_string(),
                target: target.to_string(),
            },
            scheduled_for: scheduled_at.max(now),
            retry: self.retry,
        };

        tracing::info!(
            "📅 Scheduling job {} for tenant {} on {} (delay {}ms)",
            job.id,
            tenant_id,
            target,
            delay.num_milliseconds()
        );

        match self.queue.add(job, now).await {
            Ok(job_id) => Ok(job_id),
            Err(e) => {
                tracing::error!("❌ Failed to enqueue work item {}: {}", work_item_id, e);
                Err(e)
            }
        }
    }

    /// Cancel a job
    ///
    /// Returns false for unknown or already finished jobs. Cancelling a job that a
    /// worker already picked up stops future attempts but not the one in flight.
    pub async fn cancel(&self, job_id: &JobId) -> QueueResult<bool> {
        let removed = self.queue.remove(job_id).await?;

        if removed {
            tracing::info!("🛑 Cancelled job {}", job_id);
        } else {
            tracing::debug!("⏭️ Nothing to cancel for job {}", job_id);
        }

        Ok(removed)
    }

    /// Status snapshot of a job, or `None` for unknown ids
    pub async fn get_status(&self, job_id: &JobId) -> QueueResult<Option<JobStatus>> {
        self.status.get_status(job_id).await
    }
}
