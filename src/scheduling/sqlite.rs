/// SQLite persistence layer for scheduled jobs
///
/// Durable queue backend built on sqlx. Every state transition is a single
/// conditional statement, so SQLite's write lock provides the per-id exclusivity
/// the queue contract requires. Timestamps are stored as Unix milliseconds;
/// "not before" instants round up so a job never becomes claimable early.

use crate::scheduling::job::{
    saturating_add, ClaimedJob, JobId, JobPayload, JobRecord, JobState, Lease, NewJob, RetryPolicy,
    DEFAULT_LEASE_TIMEOUT_MS, LEASE_EXPIRED_REASON, MAX_BACKOFF_EXPONENT, MAX_BACKOFF_MS,
};
use crate::scheduling::queue::{JobQueue, QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

const JOB_COLUMNS: &str = "job_id, work_item_id, tenant_id, target, state, scheduled_for, \
    attempts_made, max_attempts, backoff_base_ms, progress, failed_reason, lease_token, \
    lease_expires_at, created_at";

/// SQLite-backed job queue
///
/// Holds one connection pool for the lifetime of the process; clones share it.
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    /// SQLite connection pool for the job database
    pool: SqlitePool,
    /// Lease granted to each claimed attempt
    lease_timeout: Duration,
}

impl SqliteQueue {
    /// Create a queue over an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lease_timeout: Duration::milliseconds(DEFAULT_LEASE_TIMEOUT_MS as i64),
        }
    }

    /// Override how long a claimed attempt may run without reporting back
    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    /// Open (or create) the job database at `database_url` and initialize the schema
    ///
    /// In-memory URLs get a single long-lived connection, since every SQLite
    /// memory connection is its own database.
    pub async fn connect(database_url: &str, max_connections: u32) -> QueueResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| QueueError::Unavailable(format!("Invalid queue database URL '{}': {}", database_url, e)))?
            .create_if_missing(true);

        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        tracing::info!("🗄️ Opening job queue database: {}", database_url);
        let pool = pool_options.connect_with(options).await?;

        let queue = Self::new(pool);
        queue.init_schema().await?;
        Ok(queue)
    }

    /// Initialize the job table schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> QueueResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_jobs (
                job_id TEXT PRIMARY KEY,
                work_item_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                target TEXT NOT NULL,
                state TEXT NOT NULL,
                scheduled_for INTEGER NOT NULL,
                attempts_made INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                backoff_base_ms INTEGER NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                failed_reason TEXT,
                lease_token TEXT,
                lease_expires_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for the due-job scan in claim_next
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_due
            ON scheduled_jobs(state, scheduled_for)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn record_from_row(row: &SqliteRow) -> QueueResult<JobRecord> {
        let id: String = row.try_get("job_id")?;
        let corrupt = |reason: String| QueueError::CorruptRecord { id: id.clone(), reason };

        let state_name: String = row.try_get("state")?;
        let state = JobState::parse(&state_name)
            .ok_or_else(|| corrupt(format!("unknown state '{}'", state_name)))?;

        let scheduled_for = from_millis(row.try_get("scheduled_for")?)
            .ok_or_else(|| corrupt("scheduled_for out of range".to_string()))?;
        let created_at = from_millis(row.try_get("created_at")?)
            .ok_or_else(|| corrupt("created_at out of range".to_string()))?;

        let lease_token: Option<String> = row.try_get("lease_token")?;
        let lease_expires_at: Option<i64> = row.try_get("lease_expires_at")?;
        let lease = match (lease_token, lease_expires_at) {
            (Some(token), Some(expires_at)) => Some(Lease {
                token,
                expires_at: from_millis(expires_at)
                    .ok_or_else(|| corrupt("lease_expires_at out of range".to_string()))?,
            }),
            _ => None,
        };

        let attempts_made: i64 = row.try_get("attempts_made")?;
        let max_attempts: i64 = row.try_get("max_attempts")?;
        let backoff_base_ms: i64 = row.try_get("backoff_base_ms")?;
        let progress: i64 = row.try_get("progress")?;

        Ok(JobRecord {
            id: JobId::from(id.clone()),
            payload: JobPayload {
                work_item_id: row.try_get("work_item_id")?,
                tenant_id: row.try_get("tenant_id")?,
                target: row.try_get("target")?,
            },
            state,
            scheduled_for,
            attempts_made: u32::try_from(attempts_made).unwrap_or(0),
            retry: RetryPolicy {
                max_attempts: u32::try_from(max_attempts).unwrap_or(0),
                backoff_base_ms: u64::try_from(backoff_base_ms).unwrap_or(0),
            },
            progress: progress.clamp(0, 100) as u8,
            failed_reason: row.try_get("failed_reason")?,
            lease,
            created_at,
        })
    }

    /// Drop the lease of an attempt that no longer owns an active job
    async fn release_lease(&self, id: &JobId, lease: &Lease) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs SET lease_token = NULL, lease_expires_at = NULL, updated_at = ?
            WHERE job_id = ? AND lease_token = ?
            "#,
        )
        .bind(to_millis(Utc::now()))
        .bind(id.as_str())
        .bind(&lease.token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::debug!("🔓 Released lease of superseded attempt on job {}", id);
        }
        Ok(())
    }

    /// Fail active jobs whose lease expired on their final attempt
    async fn fail_exhausted_stalled(&self, now: DateTime<Utc>) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs SET
                state = 'FAILED',
                failed_reason = ?,
                lease_token = NULL,
                lease_expires_at = NULL,
                updated_at = ?
            WHERE state = 'ACTIVE'
              AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
              AND attempts_made >= max_attempts
            "#,
        )
        .bind(LEASE_EXPIRED_REASON)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::warn!(
                "❌ {} jobs lost their worker on the final attempt, marked failed",
                result.rows_affected()
            );
        }
        Ok(())
    }
}

/// Instant as Unix milliseconds, rounded down
fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Instant as Unix milliseconds, rounded up
fn to_millis_ceil(at: DateTime<Utc>) -> i64 {
    let millis = at.timestamp_millis();
    if at.timestamp_subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis + 1
    }
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

#[async_trait]
impl JobQueue for SqliteQueue {
    async fn add(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<JobId> {
        let state = job.initial_state(now);

        // Upsert only over failed/removed records; live and completed ids are left
        // alone. A live lease of the replaced record is carried over.
        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_jobs
                (job_id, work_item_id, tenant_id, target, state, scheduled_for,
                 attempts_made, max_attempts, backoff_base_ms, progress, failed_reason,
                 lease_token, lease_expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, 0, NULL, NULL, NULL, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                work_item_id = excluded.work_item_id,
                tenant_id = excluded.tenant_id,
                target = excluded.target,
                state = excluded.state,
                scheduled_for = excluded.scheduled_for,
                attempts_made = 0,
                max_attempts = excluded.max_attempts,
                backoff_base_ms = excluded.backoff_base_ms,
                progress = 0,
                failed_reason = NULL,
                lease_token = CASE
                    WHEN scheduled_jobs.lease_expires_at > excluded.updated_at
                    THEN scheduled_jobs.lease_token
                    ELSE NULL
                END,
                lease_expires_at = CASE
                    WHEN scheduled_jobs.lease_expires_at > excluded.updated_at
                    THEN scheduled_jobs.lease_expires_at
                    ELSE NULL
                END,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            WHERE scheduled_jobs.state IN ('FAILED', 'REMOVED')
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.payload.work_item_id)
        .bind(&job.payload.tenant_id)
        .bind(&job.payload.target)
        .bind(state.as_str())
        .bind(to_millis_ceil(job.scheduled_for))
        .bind(i64::from(job.retry.max_attempts))
        // Backoff is capped anyway, so a larger base never changes a delay
        .bind(job.retry.backoff_base_ms.min(MAX_BACKOFF_MS) as i64)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!("♻️ Job {} already exists, not re-adding", job.id);
        } else {
            tracing::debug!("📥 Stored job {} ({}) for {}", job.id, state, job.scheduled_for);
        }

        Ok(job.id)
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM scheduled_jobs WHERE job_id = ?", JOB_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn remove(&self, id: &JobId) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs SET state = 'REMOVED', updated_at = ?
            WHERE job_id = ? AND state IN ('PENDING', 'DELAYED', 'ACTIVE')
            "#,
        )
        .bind(to_millis(Utc::now()))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<ClaimedJob>> {
        self.fail_exhausted_stalled(now).await?;

        let lease = Lease::grant(now, self.lease_timeout);

        // SET expressions see the old row, so `state = 'ACTIVE'` in the CASE
        // identifies a takeover of a stalled attempt
        let row = sqlx::query(&format!(
            r#"
            UPDATE scheduled_jobs SET
                failed_reason = CASE WHEN state = 'ACTIVE' THEN ? ELSE failed_reason END,
                state = 'ACTIVE',
                attempts_made = attempts_made + 1,
                lease_token = ?,
                lease_expires_at = ?,
                updated_at = ?
            WHERE job_id = (
                SELECT job_id FROM scheduled_jobs
                WHERE (
                    state IN ('PENDING', 'DELAYED')
                    AND scheduled_for <= ?
                    AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
                ) OR (
                    state = 'ACTIVE'
                    AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
                )
                ORDER BY scheduled_for ASC, created_at ASC, job_id ASC
                LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(LEASE_EXPIRED_REASON)
        .bind(&lease.token)
        .bind(to_millis_ceil(lease.expires_at))
        .bind(to_millis(now))
        .bind(to_millis(now))
        .bind(to_millis(now))
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await?;

        let job = match row.as_ref().map(Self::record_from_row).transpose()? {
            Some(job) => job,
            None => return Ok(None),
        };

        let lease = job.lease.clone().ok_or_else(|| QueueError::CorruptRecord {
            id: job.id.to_string(),
            reason: "claimed without a lease".to_string(),
        })?;

        Ok(Some(ClaimedJob { job, lease }))
    }

    async fn set_progress(&self, id: &JobId, lease: &Lease, progress: u8, now: DateTime<Utc>) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs SET progress = ?, lease_expires_at = MAX(lease_expires_at, ?), updated_at = ?
            WHERE job_id = ? AND state = 'ACTIVE' AND lease_token = ?
            "#,
        )
        .bind(i64::from(progress.min(100)))
        .bind(to_millis_ceil(saturating_add(now, self.lease_timeout)))
        .bind(to_millis(now))
        .bind(id.as_str())
        .bind(&lease.token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, id: &JobId, lease: &Lease) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs SET
                state = 'COMPLETED',
                progress = 100,
                lease_token = NULL,
                lease_expires_at = NULL,
                updated_at = ?
            WHERE job_id = ? AND state = 'ACTIVE' AND lease_token = ?
            "#,
        )
        .bind(to_millis(Utc::now()))
        .bind(id.as_str())
        .bind(&lease.token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        self.release_lease(id, lease).await?;
        Ok(false)
    }

    async fn fail(&self, id: &JobId, lease: &Lease, reason: &str, now: DateTime<Utc>) -> QueueResult<Option<JobState>> {
        // Backoff mirrors RetryPolicy::delay_after_attempt: min(base * 2^(attempts_made - 1), cap)
        let row = sqlx::query(
            r#"
            UPDATE scheduled_jobs SET
                state = CASE WHEN attempts_made < max_attempts THEN 'DELAYED' ELSE 'FAILED' END,
                scheduled_for = CASE
                    WHEN attempts_made < max_attempts
                    THEN ? + MIN(backoff_base_ms * (1 << MIN(attempts_made - 1, ?)), ?)
                    ELSE scheduled_for
                END,
                failed_reason = ?,
                lease_token = NULL,
                lease_expires_at = NULL,
                updated_at = ?
            WHERE job_id = ? AND state = 'ACTIVE' AND lease_token = ?
            RETURNING state
            "#,
        )
        .bind(to_millis_ceil(now))
        .bind(i64::from(MAX_BACKOFF_EXPONENT))
        .bind(MAX_BACKOFF_MS as i64)
        .bind(reason)
        .bind(to_millis(now))
        .bind(id.as_str())
        .bind(&lease.token)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let state_name: String = row.try_get("state")?;
                let state = JobState::parse(&state_name).ok_or_else(|| QueueError::CorruptRecord {
                    id: id.to_string(),
                    reason: format!("unknown state '{}'", state_name),
                })?;
                Ok(Some(state))
            }
            None => {
                self.release_lease(id, lease).await?;
                Ok(None)
            }
        }
    }

    async fn health_check(&self) -> QueueResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
