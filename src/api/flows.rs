/// Flow validation REST API endpoints
///
/// Exposes the structural validator to the flow builder. Validation never fails
/// at the HTTP level for well-formed JSON: findings are returned in the body.

use crate::{
    api::AppState,
    flow::{validate_flow, validate_node_config, Graph, Node, ValidationResult},
};
use axum::{response::Json, routing::post, Router};

/// Create flow validation routes
pub fn create_flow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows/validate", post(validate_flow_handler))
        .route("/api/flows/nodes/validate", post(validate_node_handler))
}

/// Validate a whole flow
///
/// POST /api/flows/validate
/// Body: { "nodes": [...], "connections": [...] }
/// Returns: { "valid": bool, "errors": [...], "warnings": [...] }
async fn validate_flow_handler(Json(graph): Json<Graph>) -> Json<ValidationResult> {
    let result = validate_flow(&graph.nodes, &graph.connections);

    if !result.valid {
        tracing::debug!("🚫 Flow rejected with {} errors", result.errors.len());
    } else if result.has_warnings() {
        tracing::debug!("⚠️ Flow accepted with {} warnings", result.warnings.len());
    }

    Json(result)
}

/// Validate a single node's configuration
///
/// POST /api/flows/nodes/validate
/// Body: { "id": "...", "type": "...", "label": "...", ... }
async fn validate_node_handler(Json(node): Json<Node>) -> Json<ValidationResult> {
    Json(validate_node_config(&node))
}
