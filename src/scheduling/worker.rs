/// Background job worker
///
/// Polls the queue for due jobs and hands each payload to an injected
/// [`JobHandler`], the platform publishing adapter owned by the host application.
/// Outcomes are reported back to the queue, which applies the retry policy. A
/// handler panic counts as a failed attempt.

use crate::scheduling::job::{ClaimedJob, JobId, JobRecord, JobState, Lease};
use crate::scheduling::queue::{JobQueue, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Executes the payload of a claimed job
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt of `ctx.job()`; an `Err` counts as a failed attempt
    async fn handle(&self, ctx: &JobContext<'_>) -> anyhow::Result<()>;
}

/// Handle given to a [`JobHandler`] for the duration of one attempt
pub struct JobContext<'a> {
    job: &'a JobRecord,
    lease: &'a Lease,
    queue: &'a dyn JobQueue,
}

impl<'a> JobContext<'a> {
    /// The claimed job, with `attempts_made` already counting this attempt
    pub fn job(&self) -> &JobRecord {
        self.job
    }

    /// Report progress (0-100) and renew the attempt's lease
    ///
    /// Ignored once the job is no longer active or was taken over.
    pub async fn report_progress(&self, progress: u8) -> QueueResult<()> {
        self.queue
            .set_progress(&self.job.id, self.lease, progress, Utc::now())
            .await?;
        Ok(())
    }
}

/// What happened to a job during one worker step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(JobId),
    /// Failed attempt re-armed with backoff
    Retrying(JobId),
    /// Attempts exhausted
    Failed(JobId),
    /// The job was cancelled while running; its result was dropped
    Discarded(JobId),
}

/// Polling worker bound to one queue and one handler
pub struct JobWorker {
    worker_id: String,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>, poll_interval: Duration) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            queue,
            handler,
            poll_interval,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim and run at most one due job
    ///
    /// Returns `None` when nothing is due at `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> QueueResult<Option<JobOutcome>> {
        let ClaimedJob { job, lease } = match self.queue.claim_next(now).await? {
            Some(claimed) => claimed,
            None => return Ok(None),
        };

        tracing::info!(
            "🚀 [{}] Running job {} (attempt {}/{})",
            self.worker_id,
            job.id,
            job.attempts_made,
            job.retry.max_attempts
        );

        let ctx = JobContext {
            job: &job,
            lease: &lease,
            queue: self.queue.as_ref(),
        };
        let attempt = AssertUnwindSafe(self.handler.handle(&ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(anyhow::anyhow!("Job handler panicked: {}", panic_message(&*panic)))
            });

        let outcome = match attempt {
            Ok(()) => {
                if self.queue.complete(&job.id, &lease).await? {
                    tracing::info!("✅ Job {} completed", job.id);
                    JobOutcome::Completed(job.id.clone())
                } else {
                    tracing::warn!("⚠️ Job {} finished after cancellation or takeover, result dropped", job.id);
                    JobOutcome::Discarded(job.id.clone())
                }
            }
            Err(e) => {
                let reason = e.to_string();
                match self.queue.fail(&job.id, &lease, &reason, Utc::now()).await? {
                    Some(JobState::Failed) => {
                        tracing::error!(
                            "❌ Job {} failed after {} attempts: {}",
                            job.id,
                            job.attempts_made,
                            reason
                        );
                        JobOutcome::Failed(job.id.clone())
                    }
                    Some(_) => {
                        tracing::warn!(
                            "🔁 Job {} attempt {} failed, will retry: {}",
                            job.id,
                            job.attempts_made,
                            reason
                        );
                        JobOutcome::Retrying(job.id.clone())
                    }
                    None => {
                        tracing::warn!("⚠️ Job {} failed after cancellation or takeover: {}", job.id, reason);
                        JobOutcome::Discarded(job.id.clone())
                    }
                }
            }
        };

        Ok(Some(outcome))
    }

    /// Poll until `shutdown` flips to true
    ///
    /// Each tick drains every job that is due. Queue errors are logged and the
    /// loop keeps polling.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("⏰ Starting job worker {} (poll every {:?})", self.worker_id, self.poll_interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    loop {
                        match self.run_once(Utc::now()).await {
                            Ok(Some(_)) => continue,
                            Ok(None) => break,
                            Err(e) => {
                                tracing::warn!("⚠️ Worker {} poll failed: {}", self.worker_id, e);
                                break;
                            }
                        }
                    }
                }
            }
        }

        tracing::info!("⏹️ Job worker {} stopped", self.worker_id);
    }
}

/// Text of a panic payload, when it carries one
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
