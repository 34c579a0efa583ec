/// Petgraph-backed workflow graph
///
/// Builds a directed graph from a workflow definition and provides the two
/// structural operations the coordinator needs before running anything:
/// validation and a deterministic topological order.

use crate::error::{CyclicGraphError, ValidationError};
use crate::workflow::types::{Connection, Node, NodeType, WorkflowDefinition};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// Graph view over a borrowed workflow definition
///
/// Graph node indices equal declaration positions in `definition.nodes`, so
/// ordering by `NodeIndex` is ordering by declaration.
#[derive(Debug)]
pub struct WorkflowGraph<'a> {
    definition: &'a WorkflowDefinition,
    graph: DiGraph<&'a Node, &'a Connection>,
    node_id_to_index: HashMap<&'a str, NodeIndex>,
}

impl<'a> WorkflowGraph<'a> {
    /// Build the graph; connections with unknown endpoints are left out and
    /// reported by `validate`
    pub fn new(definition: &'a WorkflowDefinition) -> Self {
        tracing::debug!("🏗️ Building workflow graph for '{}' ({} nodes, {} connections)",
            definition.id, definition.nodes.len(), definition.connections.len());

        let mut graph = DiGraph::with_capacity(definition.nodes.len(), definition.connections.len());
        let mut node_id_to_index = HashMap::new();

        for node in &definition.nodes {
            let index = graph.add_node(node);
            node_id_to_index.entry(node.id.as_str()).or_insert(index);
        }

        for connection in &definition.connections {
            let from = node_id_to_index.get(connection.from_node.as_str());
            let to = node_id_to_index.get(connection.to_node.as_str());
            if let (Some(&from), Some(&to)) = (from, to) {
                graph.add_edge(from, to, connection);
            }
        }

        Self { definition, graph, node_id_to_index }
    }

    pub fn node(&self, node_id: &str) -> Option<&'a Node> {
        self.node_id_to_index.get(node_id).map(|&idx| self.graph[idx])
    }

    /// Check the structural invariants of the workflow
    ///
    /// With `start_node` set, the single-trigger rule is replaced by checking
    /// that the start node exists. Returns every problem found, empty when valid.
    pub fn validate(&self, start_node: Option<&str>) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let mut seen = HashSet::new();
        for node in &self.definition.nodes {
            if !seen.insert(node.id.as_str()) {
                errors.push(ValidationError::DuplicateNodeId { node_id: node.id.clone() });
            }
        }

        for connection in &self.definition.connections {
            for endpoint in [&connection.from_node, &connection.to_node] {
                if !self.node_id_to_index.contains_key(endpoint.as_str()) {
                    errors.push(ValidationError::UnknownEndpoint {
                        connection_id: connection.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
        }

        for trigger in &self.definition.triggers {
            let is_trigger_node = self
                .node(&trigger.node_id)
                .is_some_and(|node| node.node_type == NodeType::Trigger);
            if !is_trigger_node {
                errors.push(ValidationError::InvalidTrigger {
                    trigger_id: trigger.id.clone(),
                    node_id: trigger.node_id.clone(),
                });
            }
        }

        match start_node {
            Some(node_id) => {
                if !self.node_id_to_index.contains_key(node_id) {
                    errors.push(ValidationError::UnknownStartNode { node_id: node_id.to_string() });
                }
            }
            None => {
                let triggers = self.trigger_node_ids();
                match triggers.len() {
                    0 => errors.push(ValidationError::MissingTrigger),
                    1 => {}
                    _ => errors.push(ValidationError::MultipleTriggers { node_ids: triggers }),
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            tracing::debug!("🔁 Cycle detected: {:?}", cycle.node_ids);
            errors.push(ValidationError::Cycle(cycle));
        }

        errors
    }

    /// Checks applied when a definition is published
    ///
    /// Several Trigger nodes are accepted when every one of them is bound to a
    /// trigger entry, since webhook and schedule runs start at their own node.
    /// Cycles through branch edges are rejected too: `validate` lets them
    /// pass, but no run can order them.
    pub fn validate_for_publish(&self) -> Vec<ValidationError> {
        let trigger_nodes = self.trigger_node_ids();
        let all_bound = trigger_nodes.len() > 1
            && trigger_nodes
                .iter()
                .all(|node_id| self.definition.triggers.iter().any(|t| &t.node_id == node_id));

        let mut errors = if all_bound {
            self.validate(Some(trigger_nodes[0].as_str()))
        } else {
            self.validate(None)
        };

        if !errors.iter().any(|e| matches!(e, ValidationError::Cycle(_))) {
            if let Err(cycle) = self.topological_order() {
                errors.push(ValidationError::Cycle(cycle));
            }
        }
        errors
    }

    fn trigger_node_ids(&self) -> Vec<String> {
        self.definition
            .nodes
            .iter()
            .filter(|node| node.node_type == NodeType::Trigger)
            .map(|node| node.id.clone())
            .collect()
    }

    /// Depth-first search with a recursion-stack set over non-branching edges
    ///
    /// Labeled edges leaving a Condition node are branch edges and are
    /// excluded; every other edge participates.
    fn find_cycle(&self) -> Option<CyclicGraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        fn visit(
            graph: &WorkflowGraph<'_>,
            index: NodeIndex,
            marks: &mut [Mark],
            stack: &mut Vec<NodeIndex>,
        ) -> Option<CyclicGraphError> {
            marks[index.index()] = Mark::OnStack;
            stack.push(index);

            for edge in graph.graph.edges(index) {
                if graph.is_branch_edge(edge.weight()) {
                    continue;
                }
                let target = edge.target();
                match marks[target.index()] {
                    Mark::OnStack => {
                        let start = stack.iter().position(|&idx| idx == target).unwrap_or(0);
                        let mut node_ids: Vec<String> = stack[start..]
                            .iter()
                            .map(|&idx| graph.graph[idx].id.clone())
                            .collect();
                        node_ids.push(graph.graph[target].id.clone());
                        return Some(CyclicGraphError { node_ids });
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(graph, target, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }

            stack.pop();
            marks[index.index()] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut stack = Vec::new();
        for index in self.graph.node_indices() {
            if marks[index.index()] == Mark::Unvisited {
                if let Some(cycle) = visit(self, index, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Whether an edge is a Condition branch (mutually exclusive at run time)
    pub fn is_branch_edge(&self, connection: &Connection) -> bool {
        connection.branch.is_some()
            && self
                .node(&connection.from_node)
                .is_some_and(|node| node.node_type == NodeType::Condition)
    }

    /// Kahn's algorithm over all edges, ties broken by declaration order
    ///
    /// Fails with `CyclicGraphError` listing the nodes that never reached
    /// in-degree zero when validation was skipped and a cycle exists.
    pub fn topological_order(&self) -> Result<Vec<String>, CyclicGraphError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.edges_directed(idx, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for edge in self.graph.edges(index) {
                let target = edge.target();
                in_degree[target.index()] -= 1;
                if in_degree[target.index()] == 0 {
                    ready.push(Reverse(target));
                }
            }
        }

        if order.len() < self.graph.node_count() {
            let node_ids = self
                .graph
                .node_indices()
                .filter(|idx| in_degree[idx.index()] > 0)
                .map(|idx| self.graph[idx].id.clone())
                .collect();
            return Err(CyclicGraphError { node_ids });
        }

        Ok(order.into_iter().map(|idx| self.graph[idx].id.clone()).collect())
    }

    /// Node ids reachable from `start` (inclusive), breadth-first
    pub fn reachable_from(&self, start: &str) -> HashSet<String> {
        let mut reachable = HashSet::new();
        let Some(&start_index) = self.node_id_to_index.get(start) else {
            return reachable;
        };

        let mut queue = VecDeque::from([start_index]);
        reachable.insert(self.graph[start_index].id.clone());

        while let Some(current) = queue.pop_front() {
            for target in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if reachable.insert(self.graph[target].id.clone()) {
                    queue.push_back(target);
                }
            }
        }

        reachable
    }

    /// Connections pointing at `node_id`, in declaration order
    pub fn incoming(&self, node_id: &str) -> Vec<&'a Connection> {
        let Some(&index) = self.node_id_to_index.get(node_id) else {
            return Vec::new();
        };
        let mut edges: Vec<&'a Connection> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| *edge.weight())
            .collect();
        edges.sort_by_key(|connection| {
            self.definition
                .connections
                .iter()
                .position(|c| std::ptr::eq(c, *connection))
        });
        edges
    }
}
