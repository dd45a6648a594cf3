//! Graph construction and validation.

use crate::error::GraphError;
use crate::graph::compiled::CompiledGraph;
use crate::graph::stage::{FailurePolicy, Stage, WorkflowState};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Sentinel edge target: `add_edge("export", END)` marks `export` as the
/// single terminal stage.
pub const END: &str = "__end__";

pub(crate) struct StageNode<S: WorkflowState> {
    pub(crate) name: String,
    pub(crate) stage: Arc<dyn Stage<S>>,
    pub(crate) policy: FailurePolicy,
}

/// Mutable graph under construction.
///
/// Register stages with [`add_stage`](Self::add_stage), declare dependencies
/// with [`add_edge`](Self::add_edge), pick the start with
/// [`set_entry`](Self::set_entry), then [`compile`](Self::compile) into an
/// immutable [`CompiledGraph`].
pub struct WorkflowGraph<S: WorkflowState> {
    nodes: Vec<StageNode<S>>,
    index: HashMap<String, usize>,
    edges: Vec<(usize, usize)>,
    terminals: Vec<usize>,
    entry: Option<usize>,
}

impl<S: WorkflowState> Default for WorkflowGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: WorkflowState> WorkflowGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            terminals: Vec::new(),
            entry: None,
        }
    }

    /// Register `stage` under `name` with the default [`FailurePolicy::Abort`].
    pub fn add_stage(
        &mut self,
        name: impl Into<String>,
        stage: impl Stage<S> + 'static,
    ) -> Result<&mut Self, GraphError> {
        self.add_stage_with_policy(name, stage, FailurePolicy::default())
    }

    /// Register `stage` under `name` with an explicit failure policy.
    pub fn add_stage_with_policy(
        &mut self,
        name: impl Into<String>,
        stage: impl Stage<S> + 'static,
        policy: FailurePolicy,
    ) -> Result<&mut Self, GraphError> {
        let name = name.into();
        if name == END || self.index.contains_key(&name) {
            return Err(GraphError::DuplicateStage(name));
        }
        self.index.insert(name.clone(), self.nodes.len());
        self.nodes.push(StageNode {
            name,
            stage: Arc::new(stage),
            policy,
        });
        Ok(self)
    }

    /// Change the failure policy of an already registered stage.
    pub fn set_policy(&mut self, name: &str, policy: FailurePolicy) -> Result<&mut Self, GraphError> {
        let idx = self.lookup(name)?;
        self.nodes[idx].policy = policy;
        Ok(self)
    }

    /// Declare that `to` runs only after `from` has completed.
    ///
    /// `to` may be [`END`]. Declaring the same edge twice is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<&mut Self, GraphError> {
        let from_idx = self.lookup(from)?;
        if to == END {
            if !self.terminals.contains(&from_idx) {
                self.terminals.push(from_idx);
            }
            return Ok(self);
        }
        let to_idx = self.lookup(to)?;
        if !self.edges.contains(&(from_idx, to_idx)) {
            self.edges.push((from_idx, to_idx));
        }
        Ok(self)
    }

    /// Designate the stage execution starts from.
    pub fn set_entry(&mut self, name: &str) -> Result<&mut Self, GraphError> {
        self.entry = Some(self.lookup(name)?);
        Ok(self)
    }

    fn lookup(&self, name: &str) -> Result<usize, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownStage(name.to_string()))
    }

    /// Validate the graph and freeze it.
    ///
    /// Checks, in order:
    /// 1. an entry stage was set;
    /// 2. there are no cycles (depth-first search with three colours);
    /// 3. every stage other than the entry has a predecessor and is reachable
    ///    from the entry;
    /// 4. if [`END`] was used, exactly one stage routes to it and every other
    ///    stage has a successor.
    pub fn compile(self) -> Result<CompiledGraph<S>, GraphError> {
        let entry = self.entry.ok_or(GraphError::MissingEntry)?;
        let n = self.nodes.len();

        let mut successors = vec![Vec::new(); n];
        let mut predecessors = vec![Vec::new(); n];
        for &(from, to) in &self.edges {
            successors[from].push(to);
            predecessors[to].push(from);
        }

        if let Some(cycle) = find_cycle(&successors) {
            return Err(GraphError::CyclicGraph {
                path: cycle
                    .into_iter()
                    .map(|i| self.nodes[i].name.clone())
                    .collect(),
            });
        }

        if let Some(orphan) = (0..n).find(|&i| i != entry && predecessors[i].is_empty()) {
            return Err(GraphError::DisconnectedStage(self.nodes[orphan].name.clone()));
        }
        let reachable = reachable_from(entry, &successors);
        if let Some(unreached) = (0..n).find(|&i| !reachable[i]) {
            return Err(GraphError::DisconnectedStage(self.nodes[unreached].name.clone()));
        }

        let terminal = self.validate_terminal(&successors)?;
        let order = topological_order(entry, &successors, &predecessors);

        Ok(CompiledGraph::new(
            self.nodes,
            successors,
            predecessors,
            entry,
            terminal,
            order,
        ))
    }

    fn validate_terminal(&self, successors: &[Vec<usize>]) -> Result<Option<usize>, GraphError> {
        let terminal = match self.terminals.as_slice() {
            [] => return Ok(None),
            [only] => *only,
            many => {
                let names: Vec<&str> = many.iter().map(|&i| self.nodes[i].name.as_str()).collect();
                return Err(GraphError::InvalidTerminal(format!(
                    "multiple stages route to END: {}",
                    names.join(", ")
                )));
            }
        };
        if !successors[terminal].is_empty() {
            return Err(GraphError::InvalidTerminal(format!(
                "'{}' routes to END but has other successors",
                self.nodes[terminal].name
            )));
        }
        if let Some(sink) = (0..successors.len()).find(|&i| i != terminal && successors[i].is_empty()) {
            return Err(GraphError::InvalidTerminal(format!(
                "'{}' has no successors and never reaches END",
                self.nodes[sink].name
            )));
        }
        Ok(Some(terminal))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Iterative three-colour DFS. Returns the cycle as a closed path
/// (`[a, b, a]`) if one exists.
fn find_cycle(successors: &[Vec<usize>]) -> Option<Vec<usize>> {
    let n = successors.len();
    let mut colour = vec![Colour::White; n];

    for root in 0..n {
        if colour[root] != Colour::White {
            continue;
        }
        // (node, index of the next successor to visit)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        colour[root] = Colour::Grey;

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            if let Some(&succ) = successors[node].get(next) {
                top.1 += 1;
                match colour[succ] {
                    Colour::White => {
                        colour[succ] = Colour::Grey;
                        stack.push((succ, 0));
                    }
                    Colour::Grey => {
                        let start = stack.iter().position(|&(v, _)| v == succ).unwrap_or(0);
                        let mut cycle: Vec<usize> = stack[start..].iter().map(|&(v, _)| v).collect();
                        cycle.push(succ);
                        return Some(cycle);
                    }
                    Colour::Black => {}
                }
            } else {
                colour[node] = Colour::Black;
                stack.pop();
            }
        }
    }
    None
}

fn reachable_from(entry: usize, successors: &[Vec<usize>]) -> Vec<bool> {
    let mut seen = vec![false; successors.len()];
    let mut queue = VecDeque::from([entry]);
    seen[entry] = true;
    while let Some(node) = queue.pop_front() {
        for &succ in &successors[node] {
            if !seen[succ] {
                seen[succ] = true;
                queue.push_back(succ);
            }
        }
    }
    seen
}

/// Kahn's algorithm from the entry; only called on validated DAGs.
fn topological_order(entry: usize, successors: &[Vec<usize>], predecessors: &[Vec<usize>]) -> Vec<usize> {
    let mut waiting: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut order = Vec::with_capacity(successors.len());
    let mut queue = VecDeque::from([entry]);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &succ in &successors[node] {
            waiting[succ] -= 1;
            if waiting[succ] == 0 {
                queue.push_back(succ);
            }
        }
    }
    order
}
