/// HTTP API Layer
///
/// This module provides thin REST endpoints over the core engine. It handles:
/// - Flow and node validation for the flow builder
/// - Scheduling, cancelling, and polling delayed jobs

use crate::scheduling::{JobQueue, RetryPolicy, SchedulingGateway};
use std::sync::Arc;

// Flow validation endpoints
pub mod flows;

// Scheduled job endpoints (POST/GET/DELETE)
pub mod jobs;

// Re-export router builders
pub use flows::create_flow_routes;
pub use jobs::create_job_routes;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Gateway over the shared queue connection
    pub gateway: Arc<SchedulingGateway>,
    /// Queue backend, for health checks
    pub queue: Arc<dyn JobQueue>,
}

impl AppState {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self::with_retry_policy(queue, RetryPolicy::default())
    }

    /// State whose gateway attaches `retry` to every scheduled job
    pub fn with_retry_policy(queue: Arc<dyn JobQueue>, retry: RetryPolicy) -> Self {
        Self {
            gateway: Arc::new(SchedulingGateway::new(Arc::clone(&queue)).with_retry_policy(retry)),
            queue,
        }
    }
}
