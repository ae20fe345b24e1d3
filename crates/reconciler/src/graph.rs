//! # Dependency graph
//!
//! Adjacency model of a group's `dependsOn` edges (item → dependency) built
//! with petgraph, plus cycle detection.
//!
//! Dependencies that name no item in the group are kept aside as dangling
//! references: they are not structural errors here, the readiness evaluator
//! treats them as never ready.

use std::collections::{HashMap, HashSet};

use depgroup_core::Item;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

/// Structural problems that make a group's plan invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate item name '{0}'")]
    DuplicateItem(String),

    #[error("cycle detected involving '{node}': {}", path.join(" -> "))]
    CycleDetected { node: String, path: Vec<String> },
}

/// Dependency graph of one group, rebuilt every pass.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
    dangling: Vec<(String, String)>,
}

impl DependencyGraph {
    /// Build the graph from items in declaration order.
    ///
    /// # Errors
    /// Returns `GraphError::DuplicateItem` for the first name declared twice.
    pub fn build(items: &[Item]) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(items.len(), items.len());
        let mut node_map = HashMap::with_capacity(items.len());

        for item in items {
            if node_map.contains_key(&item.name) {
                return Err(GraphError::DuplicateItem(item.name.clone()));
            }
            let index = graph.add_node(item.name.clone());
            node_map.insert(item.name.clone(), index);
        }

        let mut dangling = Vec::new();
        for item in items {
            let Some(&from) = node_map.get(&item.name) else {
                continue;
            };
            for dep in &item.depends_on {
                match node_map.get(dep) {
                    Some(&to) => {
                        graph.update_edge(from, to, ());
                    }
                    None => dangling.push((item.name.clone(), dep.clone())),
                }
            }
        }

        Ok(Self {
            graph,
            node_map,
            dangling,
        })
    }

    /// Number of items.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of resolved dependency edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// `(item, missing dependency)` pairs, in declaration order.
    #[must_use]
    pub fn dangling(&self) -> &[(String, String)] {
        &self.dangling
    }

    /// Resolved dependencies of an item, in declaration order.
    #[must_use]
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.node_map
            .get(name)
            .map(|&index| {
                self.ordered_neighbors(index)
                    .into_iter()
                    .filter_map(|n| self.graph.node_weight(n).map(String::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Depth-first cycle check.
    ///
    /// Roots are tried in declaration order and neighbours in `dependsOn`
    /// order, so the same input always blames the same node: the first node
    /// found already on the active path.
    ///
    /// # Errors
    /// Returns `GraphError::CycleDetected` with the blamed node and the cycle
    /// path from it back to itself.
    pub fn validate_acyclic(&self) -> Result<(), GraphError> {
        let mut visited: HashSet<NodeIndex> = HashSet::with_capacity(self.node_count());
        let mut on_stack: HashSet<NodeIndex> = HashSet::new();

        for root in self.graph.node_indices() {
            if visited.contains(&root) {
                continue;
            }

            // Explicit stack of (node, neighbours, next neighbour position).
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
            visited.insert(root);
            on_stack.insert(root);
            stack.push((root, self.ordered_neighbors(root), 0));

            while let Some((node, neighbors, next)) = stack.last_mut() {
                let node = *node;
                let candidate = neighbors.get(*next).copied();
                *next = next.saturating_add(1);

                let Some(neighbor) = candidate else {
                    on_stack.remove(&node);
                    stack.pop();
                    continue;
                };

                if on_stack.contains(&neighbor) {
                    return Err(self.cycle_error(neighbor, &stack));
                }
                if visited.insert(neighbor) {
                    on_stack.insert(neighbor);
                    stack.push((neighbor, self.ordered_neighbors(neighbor), 0));
                }
            }
        }

        Ok(())
    }

    /// Items ordered so every dependency comes before its dependents.
    ///
    /// # Errors
    /// Returns `GraphError::CycleDetected` when no such order exists.
    pub fn rollout_order(&self) -> Result<Vec<&str>, GraphError> {
        self.validate_acyclic()?;
        let sorted = petgraph::algo::toposort(&self.graph, None).map_err(|cycle| {
            let node = self.name(cycle.node_id()).to_string();
            GraphError::CycleDetected {
                path: vec![node.clone(), node.clone()],
                node,
            }
        })?;
        Ok(sorted.into_iter().rev().map(|index| self.name(index)).collect())
    }

    fn name(&self, index: NodeIndex) -> &str {
        self.graph.node_weight(index).map_or("", String::as_str)
    }

    /// petgraph yields the most recently added edge first.
    fn ordered_neighbors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        neighbors.reverse();
        neighbors
    }

    fn cycle_error(
        &self,
        blamed: NodeIndex,
        stack: &[(NodeIndex, Vec<NodeIndex>, usize)],
    ) -> GraphError {
        let mut path: Vec<String> = stack
            .iter()
            .map(|(node, _, _)| *node)
            .skip_while(|node| *node != blamed)
            .map(|node| self.name(node).to_string())
            .collect();
        let node = self.name(blamed).to_string();
        path.push(node.clone());
        GraphError::CycleDetected { node, path }
    }
}
