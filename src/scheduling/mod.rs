/// Scheduling Layer
///
/// This module turns validated work items into delayed, retryable jobs:
/// - Job identity, payload, lifecycle state, and retry policy
/// - The queue backend contract and its in-memory and SQLite implementations
/// - The scheduling gateway and read-only job status projection
/// - A polling worker that drives job execution through an injected handler

// Job type definitions and retry policy
pub mod job;

// Queue backend contract and errors
pub mod queue;

// In-process queue backend
pub mod memory;

// Durable SQLite queue backend
pub mod sqlite;

// Scheduling gateway and job status reader
pub mod gateway;

// Background job worker
pub mod worker;

// Re-export commonly used types
pub use gateway::{JobStatusReader, SchedulingGateway};
pub use job::{ClaimedJob, JobId, JobPayload, JobRecord, JobState, JobStatus, Lease, RetryPolicy};
pub use memory::MemoryQueue;
pub use queue::{JobQueue, QueueError, QueueResult};
pub use sqlite::SqliteQueue;
pub use worker::{JobContext, JobHandler, JobOutcome, JobWorker};
