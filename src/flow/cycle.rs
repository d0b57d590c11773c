/// Cycle detection over flow connections
///
/// Builds an index-based adjacency graph with petgraph and runs an iterative
/// depth-first search tracking `visited` and `on_stack` vertices. An edge into a
/// vertex that is still on the active path is a back-edge, i.e. a cycle.

use crate::flow::types::{Connection, Node};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Return true when the connections between `nodes` contain any cycle,
/// including self-loops
///
/// Connections may reference ids that are not among `nodes`; those ids become
/// vertices of their own so traversal through them still works.
pub fn has_cycle(nodes: &[Node], connections: &[Connection]) -> bool {
    let found = connections.iter().any(Connection::is_self_loop)
        || FlowAdjacency::build(nodes, connections).has_cycle();

    if found {
        tracing::debug!(
            "🔁 Cycle detected among {} nodes / {} connections",
            nodes.len(),
            connections.len()
        );
    }

    found
}

/// Adjacency arena for a single flow snapshot
struct FlowAdjacency<'a> {
    /// Directed graph of node ids (declared and phantom)
    graph: DiGraph<&'a str, ()>,
    /// Declared nodes in declaration order; DFS roots
    roots: Vec<NodeIndex>,
}

impl<'a> FlowAdjacency<'a> {
    fn build(nodes: &'a [Node], connections: &'a [Connection]) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of: HashMap<&'a str, NodeIndex> = HashMap::new();
        let mut roots = Vec::with_capacity(nodes.len());

        for node in nodes {
            if !index_of.contains_key(node.id.as_str()) {
                let index = graph.add_node(node.id.as_str());
                index_of.insert(node.id.as_str(), index);
                roots.push(index);
            }
        }

        for connection in connections {
            let source = *index_of
                .entry(connection.source_node_id.as_str())
                .or_insert_with(|| graph.add_node(connection.source_node_id.as_str()));
            let target = *index_of
                .entry(connection.target_node_id.as_str())
                .or_insert_with(|| graph.add_node(connection.target_node_id.as_str()));
            graph.add_edge(source, target, ());
        }

        Self { graph, roots }
    }

    fn has_cycle(&self) -> bool {
        let vertex_count = self.graph.node_count();
        let mut visited = vec![false; vertex_count];
        let mut on_stack = vec![false; vertex_count];

        for &root in &self.roots {
            if visited[root.index()] {
                continue;
            }

            visited[root.index()] = true;
            on_stack[root.index()] = true;
            let mut stack = vec![(root, self.graph.neighbors(root))];

            while let Some(frame) = stack.last_mut() {
                let current = frame.0;
                match frame.1.next() {
                    Some(next) if on_stack[next.index()] => return true,
                    Some(next) if !visited[next.index()] => {
                        visited[next.index()] = true;
                        on_stack[next.index()] = true;
                        stack.push((next, self.graph.neighbors(next)));
                    }
                    Some(_) => {}
                    None => {
                        on_stack[current.index()] = false;
                        stack.pop();
                    }
                }
            }
        }

        false
    }
}
