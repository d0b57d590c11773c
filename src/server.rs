/// Server setup and initialization
///
/// Wires together all components: the shared queue connection, the scheduling
/// gateway, an optional embedded worker, and HTTP routes.

use crate::{
    api::{create_flow_routes, create_job_routes, AppState},
    config::{Config, QueueBackend, QueueConfig},
    scheduling::{JobHandler, JobQueue, JobWorker, MemoryQueue, SqliteQueue},
};
use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch};

/// Construct the queue backend named in the configuration
///
/// Called once at start-up; the returned handle is shared by every component.
pub async fn connect_queue(config: &QueueConfig) -> Result<Arc<dyn JobQueue>> {
    let lease_timeout = chrono::Duration::milliseconds(i64::try_from(config.lease_timeout_ms).unwrap_or(i64::MAX));

    match config.backend {
        QueueBackend::Memory => {
            tracing::warn!("⚠️ Using in-memory job queue - scheduled jobs will not survive a restart");
            Ok(Arc::new(MemoryQueue::new().with_lease_timeout(lease_timeout)))
        }
        QueueBackend::Sqlite => {
            if let Some(dir) = sqlite_parent_dir(&config.database_url) {
                tracing::info!("📁 Ensuring queue data directory exists: {}", dir);
                std::fs::create_dir_all(&dir)
                    .map_err(|e| anyhow::anyhow!("Failed to create queue data directory: {}", e))?;
            }

            let queue = SqliteQueue::connect(&config.database_url, config.max_connections)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open job queue: {}", e))?;
            Ok(Arc::new(queue.with_lease_timeout(lease_timeout)))
        }
    }
}

/// Directory part of a file-backed SQLite URL, if any
fn sqlite_parent_dir(database_url: &str) -> Option<String> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }

    std::path::Path::new(path)
        .parent()
        .map(|dir| dir.to_string_lossy().to_string())
        .filter(|dir| !dir.is_empty())
}

/// Build the router over already-constructed state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Flow validation routes
        .merge(create_flow_routes())
        // Job scheduling routes
        .merge(create_job_routes())
        .with_state(state)
}

/// Create the main Axum application with all routes
pub async fn create_app(config: &Config) -> Result<(Router, AppState)> {
    tracing::info!("🏗️ Connecting job queue ({:?})", config.queue.backend);
    let queue = connect_queue(&config.queue).await?;

    let state = AppState::with_retry_policy(queue, config.retry.policy());
    let app = create_router(state.clone());

    tracing::info!("✅ Application initialized successfully");
    Ok((app, state))
}

/// Start the HTTP server with the given configuration
///
/// When a `handler` is supplied, a job worker runs alongside the server and is
/// shut down together with it.
pub async fn start_server(config: Config, handler: Option<Arc<dyn JobHandler>>) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting flowgate server...");

    let (app, state) = create_app(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = handler.map(|handler| {
        let worker = JobWorker::new(
            Arc::clone(&state.queue),
            handler,
            Duration::from_millis(config.queue.poll_interval_ms),
        );
        tokio::spawn(worker.run(shutdown_rx))
    });

    // Bind to the configured address
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("⏹️ Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(worker) = worker {
        worker
            .await
            .map_err(|e| anyhow::anyhow!("Job worker task failed: {}", e))?;
    }

    Ok(())
}

/// Health check endpoint handler
///
/// Returns "ok" when the queue backend is reachable.
async fn health_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    match state.queue.health_check().await {
        Ok(()) => Ok("ok"),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sqlite_parent_dir() {
        assert_eq!(sqlite_parent_dir("sqlite://data/jobs.db"), Some("data".to_string()));
        assert_eq!(sqlite_parent_dir("sqlite:var/lib/fg/jobs.db?mode=rwc"), Some("var/lib/fg".to_string()));
        assert_eq!(sqlite_parent_dir("sqlite://jobs.db"), None);
        assert_eq!(sqlite_parent_dir("sqlite::memory:"), None);
        assert_eq!(sqlite_parent_dir("postgres://x"), None);
    }

    #[tokio::test]
    async fn memory_backend_needs_no_filesystem() {
        let config = QueueConfig {
            backend: QueueBackend::Memory,
            database_url: String::new(),
            max_connections: 1,
            poll_interval_ms: 100,
            lease_timeout_ms: 30_000,
        };

        let queue = connect_queue(&config).await.unwrap();
        queue.health_check().await.unwrap();
    }
}
