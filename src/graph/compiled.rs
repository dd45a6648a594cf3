//! Immutable, validated workflow graph.

use crate::graph::builder::StageNode;
use crate::graph::executor::{Executor, RunOutcome};
use crate::graph::stage::{FailurePolicy, Stage, WorkflowState};
use crate::error::ExecutionError;
use std::sync::Arc;

/// A validated DAG of stages, produced by
/// [`crate::graph::WorkflowGraph::compile`].
///
/// Nothing about the topology can change after compilation. Stages are
/// addressed internally by index; the public API speaks stage names.
pub struct CompiledGraph<S: WorkflowState> {
    nodes: Vec<StageNode<S>>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    entry: usize,
    terminal: Option<usize>,
    order: Vec<usize>,
}

impl<S: WorkflowState> CompiledGraph<S> {
    pub(crate) fn new(
        nodes: Vec<StageNode<S>>,
        successors: Vec<Vec<usize>>,
        predecessors: Vec<Vec<usize>>,
        entry: usize,
        terminal: Option<usize>,
        order: Vec<usize>,
    ) -> Self {
        Self {
            nodes,
            successors,
            predecessors,
            entry,
            terminal,
            order,
        }
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn entry(&self) -> &str {
        &self.nodes[self.entry].name
    }

    /// The stage routed to [`crate::graph::END`], if one was declared.
    pub fn terminal(&self) -> Option<&str> {
        self.terminal.map(|i| self.nodes[i].name.as_str())
    }

    /// Stage names in a valid execution order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.nodes[i].name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn predecessors(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.position(name)?;
        Some(self.names(&self.predecessors[idx]))
    }

    pub fn successors(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.position(name)?;
        Some(self.names(&self.successors[idx]))
    }

    pub fn policy(&self, name: &str) -> Option<FailurePolicy> {
        self.position(name).map(|i| self.nodes[i].policy)
    }

    /// Run the graph with default executor settings (no cache, no observer).
    pub async fn run(&self, initial: S) -> Result<S, ExecutionError> {
        Executor::new(self).run(initial).await
    }

    /// Like [`run`](Self::run) but also returns the per-stage report.
    pub async fn run_with_report(&self, initial: S) -> Result<RunOutcome<S>, ExecutionError> {
        Executor::new(self).run_with_report(initial).await
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    fn names(&self, indices: &[usize]) -> Vec<&str> {
        indices.iter().map(|&i| self.nodes[i].name.as_str()).collect()
    }

    // ── Executor access ──────────────────────────────────────────────────

    pub(crate) fn entry_index(&self) -> usize {
        self.entry
    }

    pub(crate) fn name_at(&self, idx: usize) -> &str {
        &self.nodes[idx].name
    }

    pub(crate) fn stage_at(&self, idx: usize) -> &Arc<dyn Stage<S>> {
        &self.nodes[idx].stage
    }

    pub(crate) fn policy_at(&self, idx: usize) -> FailurePolicy {
        self.nodes[idx].policy
    }

    pub(crate) fn successors_at(&self, idx: usize) -> &[usize] {
        &self.successors[idx]
    }

    pub(crate) fn in_degrees(&self) -> Vec<usize> {
        self.predecessors.iter().map(Vec::len).collect()
    }
}

impl<S: WorkflowState> std::fmt::Debug for CompiledGraph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("entry", &self.entry())
            .field("terminal", &self.terminal())
            .field("order", &self.topological_order())
            .finish()
    }
}
