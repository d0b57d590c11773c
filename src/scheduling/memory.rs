/// In-memory queue backend
///
/// Single-process job queue for development, tests, and deployments that do not
/// need jobs to survive a restart. All operations run under one lock, which gives
/// the same per-id exclusivity the durable backend gets from SQLite.

use crate::scheduling::job::{
    saturating_add, ClaimedJob, JobId, JobRecord, JobState, Lease, NewJob, DEFAULT_LEASE_TIMEOUT_MS,
    LEASE_EXPIRED_REASON,
};
use crate::scheduling::queue::{JobQueue, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-memory job queue
#[derive(Debug)]
pub struct MemoryQueue {
    /// Key: job id, Value: stored job record
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    /// Lease granted to each claimed attempt
    lease_timeout: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            lease_timeout: Duration::milliseconds(DEFAULT_LEASE_TIMEOUT_MS as i64),
        }
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override how long a claimed attempt may run without reporting back
    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    /// Number of stored records in any state
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn add(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<JobId> {
        let mut jobs = self.jobs.lock().await;
        let id = job.id.clone();

        let in_flight = match jobs.get(&id) {
            Some(existing) if !existing.state.is_replaceable() => {
                tracing::debug!("♻️ Job {} already exists ({}), not re-adding", id, existing.state);
                return Ok(id);
            }
            Some(existing) => existing.lease.clone().filter(|lease| !lease.is_expired(now)),
            None => None,
        };

        let mut record = job.into_record(now);
        if in_flight.is_some() {
            tracing::debug!("⏳ Job {} replaced while an earlier attempt is still running", id);
        }
        record.lease = in_flight;

        tracing::debug!("📥 Stored job {} ({}) for {}", id, record.state, record.scheduled_for);
        jobs.insert(id.clone(), record);
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.jobs.lock().await.get(id).cloned())
    }

    async fn remove(&self, id: &JobId) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(id) {
            Some(record) if record.state.is_live() => {
                record.state = JobState::Removed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<ClaimedJob>> {
        let mut jobs = self.jobs.lock().await;

        for record in jobs
            .values_mut()
            .filter(|record| record.is_stalled(now) && !record.retry.allows_retry(record.attempts_made))
        {
            tracing::warn!(
                "❌ Job {} lost its worker on the final attempt ({}), marking failed",
                record.id,
                record.attempts_made
            );
            record.state = JobState::Failed;
            record.failed_reason = Some(LEASE_EXPIRED_REASON.to_string());
            record.lease = None;
        }

        let next = jobs
            .values_mut()
            .filter(|record| record.is_due(now) || record.is_stalled(now))
            .min_by(|a, b| {
                a.scheduled_for
                    .cmp(&b.scheduled_for)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            });

        Ok(next.map(|record| {
            if record.state == JobState::Active {
                tracing::warn!("🔁 Job {} lost its worker, taking it over", record.id);
                record.failed_reason = Some(LEASE_EXPIRED_REASON.to_string());
            }

            let lease = Lease::grant(now, self.lease_timeout);
            record.state = JobState::Active;
            record.attempts_made += 1;
            record.lease = Some(lease.clone());
            ClaimedJob { job: record.clone(), lease }
        }))
    }

    async fn set_progress(&self, id: &JobId, lease: &Lease, progress: u8, now: DateTime<Utc>) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(id) {
            Some(record) if record.state == JobState::Active && record.holds(lease) => {
                record.progress = progress.min(100);
                if let Some(held) = record.lease.as_mut() {
                    held.expires_at = held.expires_at.max(saturating_add(now, self.lease_timeout));
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, id: &JobId, lease: &Lease) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let record = match jobs.get_mut(id) {
            Some(record) if record.holds(lease) => record,
            _ => return Ok(false),
        };

        record.lease = None;
        if record.state != JobState::Active {
            return Ok(false);
        }

        record.state = JobState::Completed;
        record.progress = 100;
        Ok(true)
    }

    async fn fail(&self, id: &JobId, lease: &Lease, reason: &str, now: DateTime<Utc>) -> QueueResult<Option<JobState>> {
        let mut jobs = self.jobs.lock().await;
        let record = match jobs.get_mut(id) {
            Some(record) if record.holds(lease) => record,
            _ => return Ok(None),
        };

        record.lease = None;
        if record.state != JobState::Active {
            return Ok(None);
        }

        record.failed_reason = Some(reason.to_string());
        if record.retry.allows_retry(record.attempts_made) {
            record.state = JobState::Delayed;
            record.scheduled_for = saturating_add(now, record.retry.delay_after_attempt(record.attempts_made));
        } else {
            record.state = JobState::Failed;
        }

        Ok(Some(record.state))
    }

    async fn health_check(&self) -> QueueResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::job::{JobPayload, RetryPolicy, MAX_BACKOFF_MS};

    fn new_job(work_item: &str, scheduled_for: DateTime<Utc>) -> NewJob {
        NewJob {
            id: JobId::for_work_item(work_item),
            payload: JobPayload {
                work_item_id: work_item.to_string(),
                tenant_id: "tenant-1".to_string(),
                target: "YOUTUBE".to_string(),
            },
            scheduled_for,
            retry: RetryPolicy::default(),
        }
    }

    #[tokio::test]
    async fn re_adding_live_job_keeps_single_record() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        assert!(queue.is_empty().await);

        let first = queue.add(new_job("42", now + Duration::hours(1)), now).await.unwrap();
        let second = queue.add(new_job("42", now + Duration::hours(2)), now).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(queue.len().await, 1);
        let record = queue.get(&first).await.unwrap().unwrap();
        assert_eq!(record.scheduled_for, now + Duration::hours(1));
    }

    #[tokio::test]
    async fn does_not_claim_before_scheduled_time() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        queue.add(new_job("1", now + Duration::seconds(30)), now).await.unwrap();

        assert!(queue.claim_next(now).await.unwrap().is_none());

        let claimed = queue.claim_next(now + Duration::seconds(30)).await.unwrap().unwrap();
        assert_eq!(claimed.job.state, JobState::Active);
        assert_eq!(claimed.job.attempts_made, 1);
        assert_eq!(claimed.job.lease.as_ref(), Some(&claimed.lease));
    }

    #[tokio::test]
    async fn active_job_is_not_claimed_twice() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        queue.add(new_job("1", now), now).await.unwrap();

        assert!(queue.claim_next(now).await.unwrap().is_some());
        assert!(queue.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_earliest_due_job_first() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        queue.add(new_job("late", now - Duration::seconds(1)), now).await.unwrap();
        queue.add(new_job("early", now - Duration::seconds(10)), now).await.unwrap();

        let claimed = queue.claim_next(now).await.unwrap().unwrap();
        assert_eq!(claimed.job.id.as_str(), "post-early");
    }

    #[tokio::test]
    async fn failures_back_off_then_exhaust() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        let id = queue.add(new_job("1", now), now).await.unwrap();

        let first = queue.claim_next(now).await.unwrap().unwrap();
        assert_eq!(queue.fail(&id, &first.lease, "timeout", now).await.unwrap(), Some(JobState::Delayed));
        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.scheduled_for, now + Duration::seconds(5));
        assert!(queue.claim_next(now + Duration::seconds(4)).await.unwrap().is_none());

        let second = now + Duration::seconds(5);
        let retry = queue.claim_next(second).await.unwrap().unwrap();
        assert_eq!(queue.fail(&id, &retry.lease, "timeout", second).await.unwrap(), Some(JobState::Delayed));
        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.scheduled_for, second + Duration::seconds(10));

        let third = second + Duration::seconds(10);
        let last = queue.claim_next(third).await.unwrap().unwrap();
        assert_eq!(queue.fail(&id, &last.lease, "rate limited", third).await.unwrap(), Some(JobState::Failed));

        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.attempts_made, 3);
        assert_eq!(record.failed_reason.as_deref(), Some("rate limited"));
        assert!(queue.claim_next(third + Duration::hours(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removed_job_is_never_claimed_or_completed() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        let id = queue.add(new_job("1", now), now).await.unwrap();

        let claimed = queue.claim_next(now).await.unwrap().unwrap();
        assert!(queue.remove(&id).await.unwrap());
        assert!(!queue.complete(&id, &claimed.lease).await.unwrap());
        assert_eq!(queue.fail(&id, &claimed.lease, "boom", now).await.unwrap(), None);
        assert_eq!(queue.get(&id).await.unwrap().unwrap().state, JobState::Removed);
        assert!(!queue.remove(&id).await.unwrap());
    }

    #[tokio::test]
    async fn removed_job_can_be_scheduled_again() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        let id = queue.add(new_job("1", now + Duration::hours(1)), now).await.unwrap();
        queue.remove(&id).await.unwrap();

        queue.add(new_job("1", now + Duration::hours(2)), now).await.unwrap();

        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Delayed);
        assert_eq!(record.scheduled_for, now + Duration::hours(2));
    }

    #[tokio::test]
    async fn completed_job_blocks_duplicate() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        let id = queue.add(new_job("1", now), now).await.unwrap();
        let claimed = queue.claim_next(now).await.unwrap().unwrap();
        assert!(queue.complete(&id, &claimed.lease).await.unwrap());

        queue.add(new_job("1", now), now).await.unwrap();

        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.progress, 100);
        assert!(queue.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rescheduled_job_waits_for_cancelled_attempt() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        let id = queue.add(new_job("42", now), now).await.unwrap();
        let first = queue.claim_next(now).await.unwrap().unwrap();

        assert!(queue.remove(&id).await.unwrap());
        queue.add(new_job("42", now), now).await.unwrap();
        assert_eq!(queue.get(&id).await.unwrap().unwrap().state, JobState::Pending);
        assert!(queue.claim_next(now).await.unwrap().is_none());

        assert!(!queue.complete(&id, &first.lease).await.unwrap());
        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Pending);
        assert_eq!(record.lease, None);

        let second = queue.claim_next(now).await.unwrap().unwrap();
        assert_eq!(second.job.attempts_made, 1);
        assert!(!queue.complete(&id, &first.lease).await.unwrap());
        assert_eq!(queue.get(&id).await.unwrap().unwrap().state, JobState::Active);
        assert!(queue.complete(&id, &second.lease).await.unwrap());
    }

    #[tokio::test]
    async fn stalled_attempt_is_taken_over_after_lease_expiry() {
        let queue = MemoryQueue::new().with_lease_timeout(Duration::seconds(30));
        let now = Utc::now();
        let id = queue.add(new_job("1", now), now).await.unwrap();
        let lost = queue.claim_next(now).await.unwrap().unwrap();

        assert!(queue.claim_next(now + Duration::seconds(29)).await.unwrap().is_none());

        let takeover = queue.claim_next(now + Duration::seconds(30)).await.unwrap().unwrap();
        assert_eq!(takeover.job.attempts_made, 2);
        assert_eq!(takeover.job.failed_reason.as_deref(), Some(LEASE_EXPIRED_REASON));
        assert_ne!(takeover.lease, lost.lease);

        assert!(!queue.complete(&id, &lost.lease).await.unwrap());
        assert_eq!(queue.fail(&id, &lost.lease, "late", now).await.unwrap(), None);
        assert_eq!(queue.get(&id).await.unwrap().unwrap().state, JobState::Active);
        assert!(queue.complete(&id, &takeover.lease).await.unwrap());
    }

    #[tokio::test]
    async fn stalled_final_attempt_fails_job() {
        let queue = MemoryQueue::new().with_lease_timeout(Duration::seconds(30));
        let now = Utc::now();
        let mut job = new_job("1", now);
        job.retry = RetryPolicy { max_attempts: 1, backoff_base_ms: 1_000 };
        let id = queue.add(job, now).await.unwrap();
        queue.claim_next(now).await.unwrap().unwrap();

        assert!(queue.claim_next(now + Duration::minutes(1)).await.unwrap().is_none());

        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.failed_reason.as_deref(), Some(LEASE_EXPIRED_REASON));
        assert_eq!(record.lease, None);
    }

    #[tokio::test]
    async fn progress_renews_lease() {
        let queue = MemoryQueue::new().with_lease_timeout(Duration::seconds(30));
        let now = Utc::now();
        let id = queue.add(new_job("1", now), now).await.unwrap();
        let claimed = queue.claim_next(now).await.unwrap().unwrap();

        let later = now + Duration::seconds(20);
        assert!(queue.set_progress(&id, &claimed.lease, 60, later).await.unwrap());
        assert!(queue.claim_next(now + Duration::seconds(40)).await.unwrap().is_none());

        let stranger = Lease::grant(now, Duration::seconds(30));
        assert!(!queue.set_progress(&id, &stranger, 90, later).await.unwrap());
        assert_eq!(queue.get(&id).await.unwrap().unwrap().progress, 60);
    }

    #[tokio::test]
    async fn huge_backoff_saturates_instead_of_overflowing() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        let mut job = new_job("1", now);
        job.retry = RetryPolicy { max_attempts: 3, backoff_base_ms: u64::MAX };
        let id = queue.add(job, now).await.unwrap();
        let claimed = queue.claim_next(now).await.unwrap().unwrap();

        assert_eq!(queue.fail(&id, &claimed.lease, "boom", now).await.unwrap(), Some(JobState::Delayed));
        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.scheduled_for, now + Duration::milliseconds(MAX_BACKOFF_MS as i64));
    }
}
