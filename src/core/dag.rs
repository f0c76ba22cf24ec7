//! Task graph for dependency-ordered execution.
//!
//! `TaskGraphBuilder` assembles a graph leaf-first: a node may only be
//! registered once every one of its dependencies is already present, which
//! keeps the graph acyclic by construction. `build` freezes it into a
//! `TaskGraph`, which exposes read-only queries and the level partition the
//! executor schedules by.

use crate::core::task::{TaskId, TaskSpec};
use crate::error::{Error, Result};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Incrementally assembles a `TaskGraph`.
#[derive(Default)]
pub struct TaskGraphBuilder {
    graph: DiGraph<TaskSpec, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
    order: Vec<TaskId>,
    gate: Option<TaskId>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidGraph` if:
    /// - a node with the same id is already registered
    /// - any dependency is not yet registered
    /// - the node is a gate and declares dependencies
    /// - the node is a gate and a gate already exists
    pub fn add(&mut self, spec: TaskSpec) -> Result<&mut Self> {
        if self.task_index.contains_key(&spec.id) {
            return Err(Error::InvalidGraph(format!(
                "task {} registered twice",
                spec.id
            )));
        }
        if let Some(missing) = spec
            .dependencies
            .iter()
            .find(|dep| !self.task_index.contains_key(*dep))
        {
            return Err(Error::InvalidGraph(format!(
                "task {} depends on {}, which is not registered yet",
                spec.id, missing
            )));
        }
        if spec.gate {
            if !spec.dependencies.is_empty() {
                return Err(Error::InvalidGraph(format!(
                    "gate {} must not have dependencies",
                    spec.id
                )));
            }
            if let Some(existing) = &self.gate {
                return Err(Error::InvalidGraph(format!(
                    "gate {} declared but {} is already the gate",
                    spec.id, existing
                )));
            }
            self.gate = Some(spec.id.clone());
        }

        let id = spec.id.clone();
        let deps = spec.dependencies.clone();
        let index = self.graph.add_node(spec);
        for dep in &deps {
            // Presence checked above.
            if let Some(&from) = self.task_index.get(dep) {
                self.graph.add_edge(from, index, ());
            }
        }
        self.task_index.insert(id.clone(), index);
        self.order.push(id);
        Ok(self)
    }

    /// Freeze the graph.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidGraph` if the graph is empty, has no gate,
    /// does not have exactly one sink, or contains a cycle.
    pub fn build(self) -> Result<TaskGraph> {
        if self.order.is_empty() {
            return Err(Error::InvalidGraph("graph has no tasks".to_string()));
        }
        let gate = self
            .gate
            .ok_or_else(|| Error::InvalidGraph("graph has no gate".to_string()))?;
        if is_cyclic_directed(&self.graph) {
            return Err(Error::InvalidGraph("graph contains a cycle".to_string()));
        }

        let sinks: Vec<&TaskId> = self
            .order
            .iter()
            .filter(|id| {
                self.task_index.get(*id).is_some_and(|&index| {
                    self.graph
                        .neighbors_directed(index, Direction::Outgoing)
                        .next()
                        .is_none()
                })
            })
            .collect();
        let sink = match sinks.as_slice() {
            [sink] => (*sink).clone(),
            _ => {
                return Err(Error::InvalidGraph(format!(
                    "graph must have exactly one sink, found {}",
                    sinks.len()
                )))
            }
        };

        debug!(
            tasks = self.order.len(),
            edges = self.graph.edge_count(),
            gate = %gate,
            sink = %sink,
            "task graph built"
        );

        Ok(TaskGraph {
            graph: self.graph,
            task_index: self.task_index,
            order: self.order,
            gate,
            sink,
            built_at: Instant::now(),
        })
    }
}

/// A frozen, acyclic task graph with exactly one gate and one sink.
///
/// Edges point from a dependency to the task that consumes its output.
pub struct TaskGraph {
    graph: DiGraph<TaskSpec, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
    /// Declaration order.
    order: Vec<TaskId>,
    gate: TaskId,
    sink: TaskId,
    built_at: Instant,
}

impl TaskGraph {
    pub fn get(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn gate(&self) -> &TaskId {
        &self.gate
    }

    pub fn sink(&self) -> &TaskId {
        &self.sink
    }

    /// When the graph was frozen; run durations are measured from here.
    pub fn built_at(&self) -> Instant {
        self.built_at
    }

    /// Task ids in declaration order.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.order
    }

    /// Task specs in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.order.iter().filter_map(|id| self.get(id))
    }

    /// Direct dependencies of a task, in declared order.
    pub fn dependencies(&self, id: &TaskId) -> &[TaskId] {
        self.get(id)
            .map(|spec| spec.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks that consume the given task's output, in declaration order.
    pub fn dependents(&self, id: &TaskId) -> Vec<&TaskId> {
        self.order
            .iter()
            .filter(|other| self.dependencies(other).contains(id))
            .collect()
    }

    /// All edges as `(dependency, dependent)` pairs, sorted.
    pub fn edges(&self) -> Vec<(TaskId, TaskId)> {
        let mut edges: Vec<(TaskId, TaskId)> = self
            .graph
            .edge_indices()
            .filter_map(|edge| self.graph.edge_endpoints(edge))
            .filter_map(|(from, to)| {
                let from = self.graph.node_weight(from)?;
                let to = self.graph.node_weight(to)?;
                Some((from.id.clone(), to.id.clone()))
            })
            .collect();
        edges.sort();
        edges
    }

    /// Tasks ordered so that every task follows all of its dependencies.
    pub fn topological_order(&self) -> Result<Vec<&TaskSpec>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let id = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.id.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Error::InvalidGraph(format!("cycle detected at task {}", id))
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }

    /// Partition every task except the gate into scheduling levels.
    ///
    /// A task's level is one more than the deepest of its non-gate
    /// dependencies; tasks depending on nothing but the gate sit at level
    /// 0. Within a level tasks keep declaration order.
    pub fn levels(&self) -> Result<Vec<Vec<TaskId>>> {
        let mut depth: HashMap<&TaskId, usize> = HashMap::new();
        for spec in self.topological_order()? {
            if spec.id == self.gate {
                continue;
            }
            let level = spec
                .dependencies
                .iter()
                .filter(|dep| **dep != self.gate)
                .filter_map(|dep| depth.get(dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(&spec.id, level);
        }

        let count = depth.values().copied().max().map_or(0, |max| max + 1);
        let mut levels = vec![Vec::new(); count];
        for id in &self.order {
            if let Some(&level) = depth.get(id) {
                levels[level].push(id.clone());
            }
        }
        Ok(levels)
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.order)
            .field("edges", &self.graph.edge_count())
            .field("gate", &self.gate)
            .field("sink", &self.sink)
            .finish()
    }
}
