/// Scheduled job type definitions
///
/// Defines job identity, payload, lifecycle state, retry policy, and the stored
/// job record shared by every queue backend.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix of job ids derived from a work item id
pub const JOB_ID_PREFIX: &str = "post-";

/// Total execution attempts per job
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubles for each later retry
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5_000;

/// Upper bound on a single retry backoff (7 days)
pub const MAX_BACKOFF_MS: u64 = 7 * 24 * 60 * 60 * 1_000;

/// Highest doubling applied to the backoff base; any base reaches the cap by then
pub(crate) const MAX_BACKOFF_EXPONENT: u32 = 30;

/// How long a claimed attempt may run without reporting back before another
/// worker may take the job over
pub const DEFAULT_LEASE_TIMEOUT_MS: u64 = 5 * 60 * 1_000;

/// Failure reason recorded when an attempt's lease runs out
pub const LEASE_EXPIRED_REASON: &str = "Worker lease expired before the attempt reported back";

/// `at + delta`, saturating at the latest representable instant
pub fn saturating_add(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Queue-level job identifier
///
/// Derived deterministically from the work item id, so scheduling the same work
/// item twice addresses the same job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Job id for a work item (e.g., "42" -> "post-42")
    pub fn for_work_item(work_item_id: &str) -> Self {
        Self(format!("{}{}", JOB_ID_PREFIX, work_item_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifying triple handed to the worker that executes the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    /// Scheduled post (or flow run) id
    pub work_item_id: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Target platform (e.g., "YOUTUBE")
    pub target: String,
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Due and waiting for a worker
    Pending,
    /// Claimed by a worker
    Active,
    Completed,
    /// Attempts exhausted
    Failed,
    /// Waiting for its scheduled time or a retry backoff
    Delayed,
    /// Cancelled
    Removed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Active => "ACTIVE",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Delayed => "DELAYED",
            JobState::Removed => "REMOVED",
        }
    }

    /// Parse the stored representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(JobState::Pending),
            "ACTIVE" => Some(JobState::Active),
            "COMPLETED" => Some(JobState::Completed),
            "FAILED" => Some(JobState::Failed),
            "DELAYED" => Some(JobState::Delayed),
            "REMOVED" => Some(JobState::Removed),
            _ => None,
        }
    }

    /// Whether the job may still run (or is running)
    pub fn is_live(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Delayed | JobState::Active)
    }

    /// Whether a fresh job may replace a record in this state
    ///
    /// Live and completed jobs block re-submission of the same id; failed and
    /// removed jobs can be scheduled again.
    pub fn is_replaceable(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Removed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy applied to job execution (never to enqueueing)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
        }
    }
}

impl RetryPolicy {
    /// Backoff after `attempts_made` failed attempts: base * 2^(attempts_made - 1),
    /// capped at [`MAX_BACKOFF_MS`]
    pub fn delay_after_attempt(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let millis = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(MAX_BACKOFF_MS);
        Duration::milliseconds(millis as i64)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Request to add a job to the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub id: JobId,
    pub payload: JobPayload,
    /// The job must not start before this instant
    pub scheduled_for: DateTime<Utc>,
    pub retry: RetryPolicy,
}

impl NewJob {
    /// Initial state of the job when added at `now`
    pub fn initial_state(&self, now: DateTime<Utc>) -> JobState {
        if self.scheduled_for > now {
            JobState::Delayed
        } else {
            JobState::Pending
        }
    }

    /// Fresh record for this job as stored at `now`
    pub fn into_record(self, now: DateTime<Utc>) -> JobRecord {
        let state = self.initial_state(now);
        JobRecord {
            id: self.id,
            payload: self.payload,
            state,
            scheduled_for: self.scheduled_for,
            attempts_made: 0,
            retry: self.retry,
            progress: 0,
            failed_reason: None,
            lease: None,
            created_at: now,
        }
    }
}

/// Right of one worker attempt to report the outcome of a claimed job
///
/// Every claim grants a fresh token. Outcome reports must present it, so an
/// attempt that was taken over or whose job was replaced cannot touch the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub token: String,
    /// Another worker may take the job over from this instant on
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Grant a new lease at `now` lasting `timeout`
    pub fn grant(now: DateTime<Utc>, timeout: Duration) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            expires_at: saturating_add(now, timeout),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Job handed to a worker by `claim_next`, with the lease of this attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub job: JobRecord,
    pub lease: Lease,
}

/// Job as stored by a queue backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: JobId,
    pub payload: JobPayload,
    /// Stored state; see [`JobRecord::state_at`] for the observed state
    pub state: JobState,
    /// Earliest start of the next attempt
    pub scheduled_for: DateTime<Utc>,
    pub attempts_made: u32,
    pub retry: RetryPolicy,
    /// Progress reported by the worker, 0-100
    pub progress: u8,
    /// Reason of the most recent failed attempt
    pub failed_reason: Option<String>,
    /// Lease of the attempt in flight; survives cancellation and replacement
    /// until that attempt reports back or the lease expires
    pub lease: Option<Lease>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// State as observed at `now`
    ///
    /// A delayed job whose time has come is reported as pending without being
    /// rewritten, so reading status never mutates the queue.
    pub fn state_at(&self, now: DateTime<Utc>) -> JobState {
        match self.state {
            JobState::Delayed if self.scheduled_for <= now => JobState::Pending,
            state => state,
        }
    }

    /// Whether an attempt of this job may still be running at `now`
    pub fn has_live_lease(&self, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().is_some_and(|lease| !lease.is_expired(now))
    }

    /// Whether `lease` is the one currently held on this job
    pub fn holds(&self, lease: &Lease) -> bool {
        self.lease.as_ref().is_some_and(|held| held.token == lease.token)
    }

    /// Whether a worker may claim this job at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, JobState::Pending | JobState::Delayed)
            && self.scheduled_for <= now
            && !self.has_live_lease(now)
    }

    /// Whether this job is active but its attempt stopped reporting back
    pub fn is_stalled(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && !self.has_live_lease(now)
    }

    /// Read-only status snapshot at `now`
    pub fn status_at(&self, now: DateTime<Utc>) -> JobStatus {
        JobStatus {
            id: self.id.clone(),
            state: self.state_at(now),
            progress: self.progress,
            attempts_made: self.attempts_made,
            max_attempts: self.retry.max_attempts,
            failed_reason: self.failed_reason.clone(),
            scheduled_for: self.scheduled_for,
        }
    }
}

/// Status snapshot returned to polling clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    pub progress: u8,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub failed_reason: Option<String>,
    pub scheduled_for: DateTime<Utc>,
}
