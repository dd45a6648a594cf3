//! Ready-set scheduler for a [`CompiledGraph`].
//!
//! ## Algorithm
//!
//! ```text
//! ready = {entry}
//! loop:
//!     for each ready stage: replay from cache, or spawn with Arc<snapshot>
//!     wait for the next finished task
//!     merge its update into the state        (serialized here, never in tasks)
//!     for each successor: waiting -= 1; if 0 → ready
//! until nothing is in flight
//! ```
//!
//! Stages run as tokio tasks in a [`JoinSet`], so independent branches execute
//! concurrently while the executor task only waits. A successor's snapshot is
//! taken after all of its predecessors have merged, which is what makes a
//! multi-predecessor stage an AND-join with full visibility.
//!
//! When a stage with [`FailurePolicy::Abort`] fails, the `JoinSet` is aborted
//! so in-flight siblings are cancelled and no dependent ever starts.

use crate::error::{ExecutionError, StageError};
use crate::graph::cache::{CacheMode, StageCache};
use crate::graph::compiled::CompiledGraph;
use crate::graph::stage::{FailurePolicy, WorkflowState};
use crate::progress::WorkflowObserver;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// How a stage's contribution to the state was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage ran and its output was merged.
    Completed,
    /// The stage failed; its fallback output was merged instead.
    Degraded { error: String },
    /// The stage was skipped; stored output was merged instead.
    Replayed,
}

/// One entry of a [`RunReport`], in merge order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    #[serde(flatten)]
    pub status: StageStatus,
    pub duration_ms: u64,
}

/// What happened during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub stages: Vec<StageRecord>,
    pub total_duration_ms: u64,
}

impl RunReport {
    /// Names of stages in the order their output was merged.
    pub fn merge_order(&self) -> Vec<&str> {
        self.stages.iter().map(|r| r.stage.as_str()).collect()
    }

    pub fn degraded(&self) -> impl Iterator<Item = &StageRecord> {
        self.stages
            .iter()
            .filter(|r| matches!(r.status, StageStatus::Degraded { .. }))
    }

    pub fn status_of(&self, stage: &str) -> Option<&StageStatus> {
        self.stages.iter().find(|r| r.stage == stage).map(|r| &r.status)
    }
}

/// Final state plus the run report.
#[derive(Debug, Clone)]
pub struct RunOutcome<S> {
    pub state: S,
    pub report: RunReport,
}

type TaskOutput<U> = (usize, Result<Result<U, StageError>, Box<dyn Any + Send>>, u64);

/// Runs a compiled graph. Holds the optional cache and observer; the graph
/// itself is borrowed and may be run any number of times.
pub struct Executor<'g, S: WorkflowState> {
    graph: &'g CompiledGraph<S>,
    cache: Option<Arc<dyn StageCache<S::Update>>>,
    default_mode: CacheMode,
    stage_modes: HashMap<String, CacheMode>,
    observer: Option<Arc<dyn WorkflowObserver>>,
}

impl<'g, S: WorkflowState> Executor<'g, S> {
    pub fn new(graph: &'g CompiledGraph<S>) -> Self {
        Self {
            graph,
            cache: None,
            default_mode: CacheMode::Disabled,
            stage_modes: HashMap::new(),
            observer: None,
        }
    }

    /// Attach a cache, used with `mode` for every stage without an override.
    pub fn with_cache(mut self, cache: Arc<dyn StageCache<S::Update>>, mode: CacheMode) -> Self {
        self.cache = Some(cache);
        self.default_mode = mode;
        self
    }

    /// Override the cache mode of a single stage.
    pub fn cache_mode(mut self, stage: impl Into<String>, mode: CacheMode) -> Self {
        self.stage_modes.insert(stage.into(), mode);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Execute every stage once and return the accumulated state.
    pub async fn run(&self, initial: S) -> Result<S, ExecutionError> {
        Ok(self.run_with_report(initial).await?.state)
    }

    /// Execute every stage once; also report what each stage did.
    pub async fn run_with_report(&self, initial: S) -> Result<RunOutcome<S>, ExecutionError> {
        let run_start = Instant::now();
        let total = self.graph.len();
        self.notify(|o| o.on_run_start(total));
        info!("Starting workflow: {} stages, entry '{}'", total, self.graph.entry());

        let mut state = initial;
        let mut waiting = self.graph.in_degrees();
        let mut done = vec![false; total];
        let mut ready = VecDeque::from([self.graph.entry_index()]);
        let mut records: Vec<StageRecord> = Vec::with_capacity(total);
        let mut tasks: JoinSet<TaskOutput<S::Update>> = JoinSet::new();
        let mut task_stages: HashMap<Id, usize> = HashMap::new();

        loop {
            while let Some(idx) = ready.pop_front() {
                let name = self.graph.name_at(idx);

                if self.mode_for(idx) == CacheMode::Replay {
                    if let Some(update) = self.replay(name).await {
                        state.merge(update);
                        records.push(StageRecord {
                            stage: name.to_string(),
                            status: StageStatus::Replayed,
                            duration_ms: 0,
                        });
                        self.notify(|o| o.on_stage_replayed(name));
                        self.release(idx, &mut done, &mut waiting, &mut ready);
                        continue;
                    }
                }

                debug!("Launching stage '{}'", name);
                self.notify(|o| o.on_stage_start(name));
                let snapshot = Arc::new(state.clone());
                let stage = Arc::clone(self.graph.stage_at(idx));
                let handle = tasks.spawn(async move {
                    let start = Instant::now();
                    let result = AssertUnwindSafe(stage.run(snapshot)).catch_unwind().await;
                    (idx, result, start.elapsed().as_millis() as u64)
                });
                task_stages.insert(handle.id(), idx);
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (idx, outcome, elapsed_ms) = match joined {
                Ok(output) => output,
                Err(e) => {
                    tasks.abort_all();
                    return Err(self.join_failure(&task_stages, e));
                }
            };
            let name = self.graph.name_at(idx);

            let result = match outcome {
                Ok(result) => result,
                Err(panic) => {
                    tasks.abort_all();
                    let message = panic_message(panic.as_ref());
                    error!("Stage '{}' panicked: {}", name, message);
                    self.notify(|o| o.on_stage_failed(name, &message));
                    return Err(ExecutionError::StagePanicked {
                        stage: name.to_string(),
                        message,
                    });
                }
            };

            match result {
                Ok(update) => {
                    if self.mode_for(idx) != CacheMode::Disabled {
                        self.record(name, &update).await;
                    }
                    state.merge(update);
                    debug!("Stage '{}' merged after {}ms", name, elapsed_ms);
                    records.push(StageRecord {
                        stage: name.to_string(),
                        status: StageStatus::Completed,
                        duration_ms: elapsed_ms,
                    });
                    self.notify(|o| o.on_stage_complete(name, elapsed_ms));
                }
                Err(cause) => match self.graph.policy_at(idx) {
                    FailurePolicy::Abort => {
                        tasks.abort_all();
                        error!("Stage '{}' failed, aborting run: {}", name, cause);
                        self.notify(|o| o.on_stage_failed(name, &cause.to_string()));
                        return Err(ExecutionError::StageFailed {
                            stage: name.to_string(),
                            cause,
                        });
                    }
                    FailurePolicy::Degrade => {
                        warn!("Stage '{}' failed, continuing with fallback output: {}", name, cause);
                        let fallback = self.graph.stage_at(idx).degraded(&state, &cause);
                        state.merge(fallback);
                        let error = cause.to_string();
                        self.notify(|o| o.on_stage_degraded(name, &error));
                        records.push(StageRecord {
                            stage: name.to_string(),
                            status: StageStatus::Degraded { error },
                            duration_ms: elapsed_ms,
                        });
                    }
                },
            }

            self.release(idx, &mut done, &mut waiting, &mut ready);
        }

        let pending: Vec<String> = (0..total)
            .filter(|&i| !done[i])
            .map(|i| self.graph.name_at(i).to_string())
            .collect();
        if !pending.is_empty() {
            return Err(ExecutionError::Stalled { pending });
        }

        let report = RunReport {
            stages: records,
            total_duration_ms: run_start.elapsed().as_millis() as u64,
        };
        let degraded = report.degraded().count();
        self.notify(|o| o.on_run_complete(total, degraded));
        info!(
            "Workflow complete: {} stages ({} degraded) in {}ms",
            total, degraded, report.total_duration_ms
        );

        Ok(RunOutcome { state, report })
    }

    /// Mark `idx` done and move successors whose last dependency this was
    /// into the ready queue.
    fn release(&self, idx: usize, done: &mut [bool], waiting: &mut [usize], ready: &mut VecDeque<usize>) {
        done[idx] = true;
        for &succ in self.graph.successors_at(idx) {
            waiting[succ] -= 1;
            if waiting[succ] == 0 {
                ready.push_back(succ);
            }
        }
    }

    /// Panics are caught inside the task, so a `JoinError` almost always means
    /// the runtime cancelled it. Either way it is attributed to its stage.
    fn join_failure(&self, task_stages: &HashMap<Id, usize>, err: JoinError) -> ExecutionError {
        let stage = task_stages
            .get(&err.id())
            .map(|&idx| self.graph.name_at(idx).to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        error!("Stage '{}' task did not complete: {}", stage, err);
        self.notify(|o| o.on_stage_failed(&stage, &err.to_string()));
        if err.is_panic() {
            ExecutionError::StagePanicked {
                stage,
                message: err.to_string(),
            }
        } else {
            ExecutionError::StageCancelled { stage }
        }
    }

    fn mode_for(&self, idx: usize) -> CacheMode {
        if self.cache.is_none() || !self.graph.stage_at(idx).cacheable() {
            return CacheMode::Disabled;
        }
        self.stage_modes
            .get(self.graph.name_at(idx))
            .copied()
            .unwrap_or(self.default_mode)
    }

    async fn replay(&self, stage: &str) -> Option<S::Update> {
        let cache = self.cache.as_ref()?;
        match cache.load(stage).await {
            Ok(Some(update)) => {
                info!("Replaying stored output for stage '{}'", stage);
                Some(update)
            }
            Ok(None) => {
                debug!("No stored output for stage '{}', running it", stage);
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable cache entry for '{}': {}", stage, e);
                None
            }
        }
    }

    async fn record(&self, stage: &str, update: &S::Update) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(stage, update).await {
                warn!("Failed to store output of '{}': {}", stage, e);
            }
        }
    }

    fn notify(&self, event: impl FnOnce(&dyn WorkflowObserver)) {
        if let Some(observer) = &self.observer {
            event(observer.as_ref());
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
