/// Queue backend contract
///
/// The scheduling gateway and the job worker talk to a durable, delay-capable
/// queue through this trait. Backends must guarantee:
/// - one record per job id (re-adding a live or completed id is a no-op)
/// - a job is never claimed before its `scheduled_for` time
/// - a claimed job cannot be claimed again while its lease is live, even after
///   it was removed and scheduled again (per-id exclusivity)
/// - outcome reports only apply when they carry the job's current lease
/// - an active job whose lease expired is taken over by the next claim, counting
///   the lost attempt; it fails once attempts are exhausted (at-least-once)
/// - a removed job is never claimed, retried, completed, or failed afterwards

use crate::scheduling::job::{ClaimedJob, JobId, JobRecord, JobState, Lease, NewJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by queue backends
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backend cannot be reached (connection refused, pool closed or timed out)
    #[error("Queue backend unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the operation
    #[error("Queue backend error: {0}")]
    Backend(String),

    /// A stored record could not be decoded
    #[error("Corrupt job record '{id}': {reason}")]
    CorruptRecord { id: String, reason: String },
}

impl From<sqlx::Error> for QueueError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                QueueError::Unavailable(error.to_string())
            }
            other => QueueError::Backend(other.to_string()),
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// A durable, delay-capable job queue with per-id identity
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job unless a live or completed job with the same id exists
    ///
    /// Returns the job id either way; failed or removed records are replaced. A
    /// replaced record keeps the lease of an attempt still in flight, so the new
    /// job is not claimed before that attempt reports back or expires.
    async fn add(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<JobId>;

    /// Fetch the stored record of a job
    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Mark a live job as removed
    ///
    /// Returns false when the job is unknown or already terminal.
    async fn remove(&self, id: &JobId) -> QueueResult<bool>;

    /// Atomically claim the earliest due job, marking it active, counting the
    /// attempt, and granting a fresh lease
    ///
    /// Active jobs whose lease expired are claimable too; those without attempts
    /// left are marked failed instead.
    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<ClaimedJob>>;

    /// Record worker progress (0-100) on an active job and renew its lease
    async fn set_progress(&self, id: &JobId, lease: &Lease, progress: u8, now: DateTime<Utc>) -> QueueResult<bool>;

    /// Mark an active job as completed
    ///
    /// Returns false when `lease` is not the job's current lease, or the job is
    /// no longer active (e.g., removed mid-run). A matching lease is released
    /// either way.
    async fn complete(&self, id: &JobId, lease: &Lease) -> QueueResult<bool>;

    /// Record a failed attempt of an active job
    ///
    /// Re-arms the job as delayed with exponential backoff while attempts remain,
    /// otherwise marks it failed. Returns the resulting state, or `None` when the
    /// lease does not match or the job is no longer active.
    async fn fail(&self, id: &JobId, lease: &Lease, reason: &str, now: DateTime<Utc>) -> QueueResult<Option<JobState>>;

    /// Check that the backend is reachable
    async fn health_check(&self) -> QueueResult<()>;
}
