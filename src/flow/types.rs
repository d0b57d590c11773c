/// Core flow graph type definitions
///
/// Defines nodes, connections, and the graph aggregate authored in the flow builder.
/// These types are serialized/deserialized from JSON exactly as the builder sends them
/// (camelCase fields, node type as a SCREAMING_SNAKE_CASE `type` tag).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::flow::cycle;
use crate::flow::validation::{self, ValidationResult};

/// A complete flow graph: the nodes of a flow and the connections between them
///
/// A graph is always owned by a single flow record in the host application; this
/// crate only ever sees a snapshot of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Nodes of the flow, unique by id
    pub nodes: Vec<Node>,
    /// Directed connections between nodes
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Graph {
    /// Create a graph from its nodes and connections
    pub fn new(nodes: Vec<Node>, connections: Vec<Connection>) -> Self {
        Self { nodes, connections }
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Run the structural validator over this graph
    pub fn validate(&self) -> ValidationResult {
        validation::validate_flow(&self.nodes, &self.connections)
    }

    /// Whether the connections of this graph contain a cycle
    pub fn has_cycle(&self) -> bool {
        cycle::has_cycle(&self.nodes, &self.connections)
    }
}

/// A single vertex in a flow graph
///
/// The node kind carries the kind-specific fields (`agentId` for agents,
/// `processType` for processes) so those fields cannot appear on other kinds.
/// Their presence is still checked at validation time because the builder may
/// send drafts such as `"agentId": null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the flow (e.g., "n1")
    pub id: String,
    /// Display name shown on the canvas; required by validation
    #[serde(default)]
    pub label: String,
    /// Node kind and its kind-specific fields
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Opaque, kind-specific configuration bag
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
}

/// Closed set of node kinds supported by the flow builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    /// Runs an externally managed agent
    Agent {
        /// Reference to the agent entity; must be set before the flow can run
        #[serde(rename = "agentId", default)]
        agent_id: Option<String>,
    },
    /// Generic processing step
    Process {
        /// Process discriminator (e.g., "TASK"); must be non-empty
        #[serde(rename = "processType", default)]
        process_type: Option<String>,
    },
    Context,
    Visualization,
    Trigger,
    Condition,
    Integration,
    Panel,
    SocialAccount,
}

impl NodeKind {
    /// Wire name of this kind, as used in the `type` tag
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Agent { .. } => "AGENT",
            NodeKind::Process { .. } => "PROCESS",
            NodeKind::Context => "CONTEXT",
            NodeKind::Visualization => "VISUALIZATION",
            NodeKind::Trigger => "TRIGGER",
            NodeKind::Condition => "CONDITION",
            NodeKind::Integration => "INTEGRATION",
            NodeKind::Panel => "PANEL",
            NodeKind::SocialAccount => "SOCIAL_ACCOUNT",
        }
    }
}

impl Node {
    /// Create a node of a kind without kind-specific fields
    ///
    /// For agents and processes prefer [`Node::agent`] and [`Node::process`],
    /// which always produce a bound node.
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            config: Map::new(),
        }
    }

    /// Create an agent node bound to the given agent
    pub fn agent(id: impl Into<String>, label: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self::new(id, label, NodeKind::Agent { agent_id: Some(agent_id.into()) })
    }

    /// Create a process node with the given process type
    pub fn process(id: impl Into<String>, label: impl Into<String>, process_type: impl Into<String>) -> Self {
        Self::new(id, label, NodeKind::Process { process_type: Some(process_type.into()) })
    }

    /// Attach a configuration entry
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Name used when listing this node in validation messages
    ///
    /// Falls back to the id when the label is blank so the author can still find it.
    pub fn display_name(&self) -> &str {
        if self.label.trim().is_empty() {
            &self.id
        } else {
            &self.label
        }
    }

    /// Whether this is an agent node without a bound agent
    pub fn is_unbound_agent(&self) -> bool {
        match &self.kind {
            NodeKind::Agent { agent_id } => agent_id
                .as_deref()
                .map_or(true, |id| id.trim().is_empty()),
            _ => false,
        }
    }

    /// Whether this is a process node without a process type
    pub fn is_untyped_process(&self) -> bool {
        match &self.kind {
            NodeKind::Process { process_type } => process_type
                .as_deref()
                .map_or(true, |kind| kind.trim().is_empty()),
            _ => false,
        }
    }
}

/// Directed connection between two nodes
///
/// Both ends should reference nodes of the same graph, but the validator and
/// cycle detector tolerate dangling references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Source node id
    pub source_node_id: String,
    /// Target node id
    pub target_node_id: String,
    /// Optional predicate descriptor, opaque to this crate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

impl Connection {
    /// Create an unconditional connection
    pub fn new(source_node_id: impl Into<String>, target_node_id: impl Into<String>) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            condition: None,
        }
    }

    /// Attach a condition descriptor
    pub fn with_condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Whether the connection points back at its own source
    pub fn is_self_loop(&self) -> bool {
        self.source_node_id == self.target_node_id
    }
}
