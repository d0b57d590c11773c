/// Flowgate: flow graph validation and scheduled publishing engine
///
/// This library validates user-authored automation flows (cycle detection, orphan
/// and entry-point analysis, per-node checks) and turns validated work items into
/// delayed, retryable jobs on a durable queue.

// Core configuration and setup
pub mod config;

// Flow graph layer - graph model, cycle detection, and structural validation
pub mod flow;

// Scheduling layer - job model, queue backends, gateway, and worker
pub mod scheduling;

// HTTP API layer - REST endpoints for validation and job scheduling
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use flow::{has_cycle, validate_flow, validate_node_config, Connection, Graph, Node, NodeKind, ValidationResult};
pub use scheduling::{JobId, JobQueue, JobState, JobStatus, QueueError, SchedulingGateway};
pub use server::start_server;
