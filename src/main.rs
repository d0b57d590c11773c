/// Flowgate: flow graph validation and scheduled publishing engine
///
/// Main entry point for the flowgate server. Initializes configuration and starts
/// the HTTP server with validation and job scheduling endpoints.

use flowgate::{config::Config, server::start_server};

/// Application entry point
///
/// Initializes the server with environment-driven configuration and starts
/// listening for requests. The server provides:
/// - Flow validation at /api/flows/validate and /api/flows/nodes/validate
/// - Job scheduling, status, and cancellation at /api/jobs/*
/// - Health check at /healthz
///
/// Job execution needs a platform publishing handler, which embedding hosts pass
/// to `start_server`; the standalone binary only schedules and reports.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3004 and a SQLite job queue)
    let config = Config::default();

    // Start the server
    start_server(config, None).await?;

    Ok(())
}
