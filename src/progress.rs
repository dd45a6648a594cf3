//! Observer trait for per-stage workflow events.
//!
//! Inject an [`Arc<dyn WorkflowObserver>`] via
//! [`crate::config::DigestConfigBuilder::observer`] (or directly with
//! [`crate::graph::Executor::with_observer`]) to receive events as the
//! executor schedules and completes each stage.
//!
//! # Example
//!
//! ```rust
//! use pdf_digest::{DigestConfig, WorkflowObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     completed: AtomicUsize,
//! }
//!
//! impl WorkflowObserver for CountingObserver {
//!     fn on_stage_complete(&self, stage: &str, elapsed_ms: u64) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{stage} done in {elapsed_ms}ms ({done} so far)");
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { completed: AtomicUsize::new(0) });
//! let config = DigestConfig::builder()
//!     .observer(observer as Arc<dyn WorkflowObserver>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the executor as it runs a workflow.
///
/// Stage bodies run concurrently, but every callback is issued from the
/// executor task itself, so events for one run never overlap. Implementations
/// still need `Send + Sync` because the executor may move between threads.
/// All methods default to no-ops.
pub trait WorkflowObserver: Send + Sync {
    /// Called once before the entry stage is scheduled.
    fn on_run_start(&self, total_stages: usize) {
        let _ = total_stages;
    }

    /// Called when a stage is launched.
    fn on_stage_start(&self, stage: &str) {
        let _ = stage;
    }

    /// Called after a stage's output has been merged.
    fn on_stage_complete(&self, stage: &str, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called when a stage was skipped and its stored output substituted.
    fn on_stage_replayed(&self, stage: &str) {
        let _ = stage;
    }

    /// Called when a stage failed but the run continues with fallback output.
    fn on_stage_degraded(&self, stage: &str, error: &str) {
        let _ = (stage, error);
    }

    /// Called when a stage failure aborts the run.
    fn on_stage_failed(&self, stage: &str, error: &str) {
        let _ = (stage, error);
    }

    /// Called once after every stage has run.
    fn on_run_complete(&self, total_stages: usize, degraded: usize) {
        let _ = (total_stages, degraded);
    }
}

/// A no-op observer.
pub struct NoopObserver;

impl WorkflowObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::DigestConfig`].
pub type Observer = Arc<dyn WorkflowObserver>;
