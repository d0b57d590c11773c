/// Flow Graph Layer
///
/// This module handles the graph model authored in the flow builder and the
/// structural checks that gate execution and scheduling:
/// - Type definitions (Graph, Node, NodeKind, Connection)
/// - Cycle detection over connections (iterative DFS on a petgraph arena)
/// - Structural validation producing errors and warnings

// Core graph type definitions
pub mod types;

// Depth-first cycle detection
pub mod cycle;

// Structural validator
pub mod validation;

// Re-export commonly used types
pub use cycle::has_cycle;
pub use types::{Connection, Graph, Node, NodeKind};
pub use validation::{validate_flow, validate_node_config, ValidationResult};
