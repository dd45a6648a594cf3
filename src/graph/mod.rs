//! A small DAG workflow engine.
//!
//! ## Shape
//!
//! ```text
//! WorkflowGraph ──compile()──▶ CompiledGraph ──Executor::run()──▶ final state
//!  add_stage                    immutable,                  ready-set scheduler,
//!  add_edge / END               validated DAG               serialized merges
//!  set_entry
//! ```
//!
//! The engine is generic over the state type; the digest pipeline plugs in
//! [`crate::state::PaperState`]. Every stage receives an `Arc` snapshot of
//! the state taken at the moment it became ready, and returns a partial update
//! the executor merges. A stage with several predecessors is an AND-join:
//! it becomes ready only after every predecessor has merged.

pub mod builder;
pub mod cache;
pub mod compiled;
pub mod executor;
pub mod stage;

pub use builder::{WorkflowGraph, END};
pub use cache::{CacheMode, JsonFileCache, StageCache};
pub use compiled::CompiledGraph;
pub use executor::{Executor, RunOutcome, RunReport, StageRecord, StageStatus};
pub use stage::{stage_fn, FailurePolicy, FnStage, Stage, WorkflowState};
