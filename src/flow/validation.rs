/// Structural flow validation
///
/// Pure checks run before a flow may be executed or scheduled. Errors block the
/// caller's next step; warnings are informational. Findings are returned as data,
/// never as `Err`, so malformed-but-parseable graphs always yield a result.
///
/// Rules are evaluated in a fixed order so message order is deterministic:
/// 1. the flow has at least one node
/// 2. orphaned nodes (multi-node flows only, warning)
/// 3. agent nodes are bound to an agent (one batched error)
/// 4. the connections form a DAG
/// 5. at least one entry point exists (multi-node flows only, warning)
/// 6. connections only reference declared nodes (warning)

use crate::flow::cycle;
use crate::flow::types::{Connection, Node};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const EMPTY_FLOW: &str = "Flow must have at least one node";
pub const CIRCULAR_DEPENDENCIES: &str = "Flow contains circular dependencies";
pub const NO_ENTRY_POINT: &str = "Flow has no entry point: every node has an incoming connection";
pub const LABEL_REQUIRED: &str = "Node label is required";
pub const PROCESS_TYPE_REQUIRED: &str = "Process nodes must have a process type";
pub const AGENT_REQUIRED: &str = "Agent nodes must have an agent selected";

/// Outcome of a validation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when `errors` is empty
    pub valid: bool,
    /// Blocking findings, one message per problem class
    pub errors: Vec<String>,
    /// Non-blocking findings
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Whether any warnings were produced
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Accumulates findings for one validation run
#[derive(Debug, Default)]
struct FlowValidator {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl FlowValidator {
    fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn finish(self) -> ValidationResult {
        ValidationResult {
            valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }

    fn check_not_empty(&mut self, nodes: &[Node]) {
        if nodes.is_empty() {
            self.add_error(EMPTY_FLOW);
        }
    }

    fn check_orphans(&mut self, nodes: &[Node], connections: &[Connection]) {
        if nodes.len() <= 1 {
            return;
        }

        let connected: HashSet<&str> = connections
            .iter()
            .flat_map(|c| [c.source_node_id.as_str(), c.target_node_id.as_str()])
            .collect();

        let orphans: Vec<&str> = nodes
            .iter()
            .filter(|node| !connected.contains(node.id.as_str()))
            .map(Node::display_name)
            .collect();

        if !orphans.is_empty() {
            self.add_warning(format!("Orphaned nodes (not connected): {}", orphans.join(", ")));
        }
    }

    fn check_agent_bindings(&mut self, nodes: &[Node]) {
        let unbound: Vec<&str> = nodes
            .iter()
            .filter(|node| node.is_unbound_agent())
            .map(Node::display_name)
            .collect();

        if !unbound.is_empty() {
            self.add_error(format!("{}: {}", AGENT_REQUIRED, unbound.join(", ")));
        }
    }

    fn check_acyclic(&mut self, nodes: &[Node], connections: &[Connection]) {
        if cycle::has_cycle(nodes, connections) {
            self.add_error(CIRCULAR_DEPENDENCIES);
        }
    }

    fn check_entry_points(&mut self, nodes: &[Node], connections: &[Connection]) {
        if nodes.len() <= 1 {
            return;
        }

        let targets: HashSet<&str> = connections
            .iter()
            .map(|c| c.target_node_id.as_str())
            .collect();

        let has_entry_point = nodes.iter().any(|node| !targets.contains(node.id.as_str()));
        if !has_entry_point {
            self.add_warning(NO_ENTRY_POINT);
        }
    }

    fn check_references(&mut self, nodes: &[Node], connections: &[Connection]) {
        let declared: HashSet<&str> = nodes.iter().map(|node| node.id.as_str()).collect();

        let mut dangling: Vec<&str> = Vec::new();
        for id in connections
            .iter()
            .flat_map(|c| [c.source_node_id.as_str(), c.target_node_id.as_str()])
        {
            if !declared.contains(id) && !dangling.contains(&id) {
                dangling.push(id);
            }
        }

        if !dangling.is_empty() {
            self.add_warning(format!(
                "Connections reference unknown nodes: {}",
                dangling.join(", ")
            ));
        }
    }
}

/// Validate a flow snapshot
///
/// Deterministic and side-effect free: the same input always yields the same result.
pub fn validate_flow(nodes: &[Node], connections: &[Connection]) -> ValidationResult {
    let mut validator = FlowValidator::default();

    validator.check_not_empty(nodes);
    validator.check_orphans(nodes, connections);
    validator.check_agent_bindings(nodes);
    validator.check_acyclic(nodes, connections);
    validator.check_entry_points(nodes, connections);
    validator.check_references(nodes, connections);

    let result = validator.finish();
    tracing::debug!(
        "🔍 Validated flow: {} nodes, {} connections, {} errors, {} warnings",
        nodes.len(),
        connections.len(),
        result.errors.len(),
        result.warnings.len()
    );
    result
}

/// Validate the configuration of a single node
pub fn validate_node_config(node: &Node) -> ValidationResult {
    let mut validator = FlowValidator::default();

    if node.label.trim().is_empty() {
        validator.add_error(LABEL_REQUIRED);
    }
    if node.is_untyped_process() {
        validator.add_error(PROCESS_TYPE_REQUIRED);
    }
    if node.is_unbound_agent() {
        validator.add_error(AGENT_REQUIRED);
    }

    validator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::NodeKind;

    fn unbound_agent(id: &str, label: &str) -> Node {
        Node::new(id, label, NodeKind::Agent { agent_id: None })
    }

    #[test]
    fn empty_flow_is_invalid() {
        let result = validate_flow(&[], &[]);

        assert!(!result.valid);
        assert_eq!(result.errors, vec![EMPTY_FLOW.to_string()]);
    }

    #[test]
    fn trigger_into_unbound_agent() {
        let nodes = vec![
            Node::new("n1", "Start", NodeKind::Trigger),
            unbound_agent("n2", "Bot"),
        ];
        let connections = vec![Connection::new("n1", "n2")];

        let result = validate_flow(&nodes, &connections);

        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Bot"));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn single_process_node_is_valid_without_warnings() {
        let nodes = vec![Node::process("n1", "Step1", "TASK")];

        let result = validate_flow(&nodes, &[]);

        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(!result.has_warnings());
    }

    #[test]
    fn unbound_agents_are_batched_into_one_error() {
        let nodes = vec![
            Node::new("t", "Start", NodeKind::Trigger),
            unbound_agent("a1", "Writer"),
            unbound_agent("a2", "Editor"),
            Node::agent("a3", "Publisher", "agent-3"),
        ];
        let connections = vec![
            Connection::new("t", "a1"),
            Connection::new("a1", "a2"),
            Connection::new("a2", "a3"),
        ];

        let result = validate_flow(&nodes, &connections);

        assert_eq!(result.errors, vec![format!("{}: Writer, Editor", AGENT_REQUIRED)]);
    }

    #[test]
    fn orphans_are_warnings_listing_labels() {
        let nodes = vec![
            Node::new("t", "Start", NodeKind::Trigger),
            Node::process("p", "Step", "TASK"),
            Node::new("v", "Chart", NodeKind::Visualization),
        ];
        let connections = vec![Connection::new("t", "p")];

        let result = validate_flow(&nodes, &connections);

        assert!(result.valid);
        assert!(result.has_warnings());
        assert_eq!(result.warnings, vec!["Orphaned nodes (not connected): Chart".to_string()]);
    }

    #[test]
    fn self_loop_reports_circular_dependency() {
        let nodes = vec![Node::process("p", "Loop", "TASK")];
        let connections = vec![Connection::new("p", "p")];

        let result = validate_flow(&nodes, &connections);

        assert!(!result.valid);
        assert_eq!(result.errors, vec![CIRCULAR_DEPENDENCIES.to_string()]);
    }

    #[test]
    fn full_cycle_also_lacks_entry_point() {
        let nodes = vec![
            Node::process("a", "A", "TASK"),
            Node::process("b", "B", "TASK"),
            Node::process("c", "C", "TASK"),
        ];
        let connections = vec![
            Connection::new("a", "b"),
            Connection::new("b", "c"),
            Connection::new("c", "a"),
        ];

        let result = validate_flow(&nodes, &connections);

        assert_eq!(result.errors, vec![CIRCULAR_DEPENDENCIES.to_string()]);
        assert_eq!(result.warnings, vec![NO_ENTRY_POINT.to_string()]);
    }

    #[test]
    fn diamond_flow_is_valid() {
        let nodes = vec![
            Node::new("a", "Start", NodeKind::Trigger),
            Node::process("b", "Left", "TASK"),
            Node::process("c", "Right", "TASK"),
            Node::new("d", "Join", NodeKind::Condition),
        ];
        let connections = vec![
            Connection::new("a", "b"),
            Connection::new("a", "c"),
            Connection::new("b", "d"),
            Connection::new("c", "d"),
        ];

        assert_eq!(
            validate_flow(&nodes, &connections),
            ValidationResult { valid: true, errors: vec![], warnings: vec![] }
        );
    }

    #[test]
    fn error_order_follows_rule_order() {
        let nodes = vec![
            unbound_agent("a", "Bot"),
            Node::process("b", "Step", "TASK"),
            Node::new("c", "Lonely", NodeKind::Panel),
        ];
        let connections = vec![Connection::new("a", "b"), Connection::new("b", "a")];

        let result = validate_flow(&nodes, &connections);

        assert_eq!(
            result.errors,
            vec![format!("{}: Bot", AGENT_REQUIRED), CIRCULAR_DEPENDENCIES.to_string()]
        );
        assert_eq!(
            result.warnings,
            vec!["Orphaned nodes (not connected): Lonely".to_string()]
        );
    }

    #[test]
    fn dangling_references_degrade_to_warning() {
        let nodes = vec![
            Node::new("t", "Start", NodeKind::Trigger),
            Node::process("p", "Step", "TASK"),
        ];
        let connections = vec![Connection::new("t", "p"), Connection::new("p", "ghost")];

        let result = validate_flow(&nodes, &connections);

        assert!(result.valid);
        assert_eq!(
            result.warnings,
            vec!["Connections reference unknown nodes: ghost".to_string()]
        );
    }

    #[test]
    fn validation_is_repeatable() {
        let nodes = vec![unbound_agent("a", "Bot"), Node::new("x", "X", NodeKind::Integration)];

        assert_eq!(validate_flow(&nodes, &[]), validate_flow(&nodes, &[]));
    }

    #[test]
    fn node_config_checks() {
        assert!(validate_node_config(&Node::process("p", "Step", "TASK")).valid);

        let blank = validate_node_config(&Node::new("x", "", NodeKind::Trigger));
        assert_eq!(blank.errors, vec![LABEL_REQUIRED.to_string()]);

        let untyped = validate_node_config(&Node::new("p", "Step", NodeKind::Process { process_type: None }));
        assert_eq!(untyped.errors, vec![PROCESS_TYPE_REQUIRED.to_string()]);

        let agent = validate_node_config(&unbound_agent("a", "Bot"));
        assert!(!agent.valid);
        assert_eq!(agent.errors, vec![AGENT_REQUIRED.to_string()]);
    }
}
