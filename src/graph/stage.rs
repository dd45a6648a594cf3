//! The stage contract: what the executor needs from a unit of work.

use crate::error::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// State that can flow through a workflow graph.
///
/// Stages never mutate the state; they return an `Update` which the executor
/// folds in with [`WorkflowState::merge`]. Merges happen one at a time on the
/// executor task, so `merge` needs no synchronisation of its own.
pub trait WorkflowState: Clone + Send + Sync + 'static {
    /// Partial record returned by a stage. `Default` is the empty update.
    type Update: Default + Send + Sync + 'static;

    /// Field-wise overwrite-or-insert. Must never remove a field.
    fn merge(&mut self, update: Self::Update);
}

/// What the executor does when a stage returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Cancel in-flight stages and fail the run. (default)
    #[default]
    Abort,
    /// Log a warning, merge [`Stage::degraded`] instead, and keep going.
    Degrade,
}

/// One named unit of work in a workflow graph.
#[async_trait]
pub trait Stage<S: WorkflowState>: Send + Sync {
    /// Run against an immutable snapshot of the state taken when this stage
    /// became ready. Returns only the fields this stage owns.
    async fn run(&self, state: Arc<S>) -> Result<S::Update, StageError>;

    /// Substitute output merged when the stage fails under
    /// [`FailurePolicy::Degrade`]. Defaults to the empty update.
    fn degraded(&self, state: &S, error: &StageError) -> S::Update {
        let _ = (state, error);
        S::Update::default()
    }

    /// Whether the executor may record and replay this stage's output.
    /// Stages with side effects outside the state return `false` and always
    /// run.
    fn cacheable(&self) -> bool {
        true
    }
}

/// Adapter turning an async closure into a [`Stage`].
pub struct FnStage<S, F> {
    f: F,
    _state: PhantomData<fn(Arc<S>)>,
}

/// Wrap `f` so it can be registered with
/// [`crate::graph::WorkflowGraph::add_stage`].
///
/// ```rust
/// use pdf_digest::graph::{stage_fn, WorkflowGraph};
/// use pdf_digest::{PaperState, StageError, StateUpdate};
///
/// let mut graph = WorkflowGraph::<PaperState>::new();
/// graph
///     .add_stage(
///         "noop",
///         stage_fn(|_state| async { Ok::<_, StageError>(StateUpdate::default()) }),
///     )
///     .unwrap();
/// ```
pub fn stage_fn<S, F, Fut>(f: F) -> FnStage<S, F>
where
    S: WorkflowState,
    F: Fn(Arc<S>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S::Update, StageError>> + Send,
{
    FnStage {
        f,
        _state: PhantomData,
    }
}

#[async_trait]
impl<S, F, Fut> Stage<S> for FnStage<S, F>
where
    S: WorkflowState,
    F: Fn(Arc<S>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S::Update, StageError>> + Send,
{
    async fn run(&self, state: Arc<S>) -> Result<S::Update, StageError> {
        (self.f)(state).await
    }
}
