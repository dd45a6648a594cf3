//! # pdf-digest
//!
//! Turn a PDF academic paper into a reading report with an LLM: section
//! summaries, a glossary, key insights and review questions.
//!
//! ## Pipeline Overview
//!
//! The work is a small DAG run by the crate's own workflow engine
//! ([`graph`]):
//!
//! ```text
//! PDF
//!  │
//!  ├─ load       text + metadata via pdfium (spawn_blocking)
//!  ├─ split      LLM → titled sections, duplicates merged
//!  ├─ summarize  one LLM call per section, ≤ N in flight
//!  ├─┬ glossary  ┐
//!  │ ├ insights  ├ run concurrently on the same snapshot
//!  │ └ questions ┘
//!  └─ export     AND-join → Markdown or PDF report
//! ```
//!
//! Each stage returns a partial [`StateUpdate`]; the executor merges updates
//! into [`PaperState`] one at a time. Per-stage [`graph::FailurePolicy`]
//! decides whether a failure aborts the run or degrades to placeholder
//! output.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_digest::{digest, DigestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = DigestConfig::builder().output_path("report.md").build()?;
//!     let output = digest("paper.pdf", &config).await?;
//!     println!("report: {:?}", output.report_path);
//!     for stage in output.report.degraded() {
//!         eprintln!("degraded: {}", stage.stage);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfdigest` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-digest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod digest;
pub mod error;
pub mod graph;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DigestConfig, DigestConfigBuilder};
pub use digest::{digest, digest_sync, digest_with, inspect};
pub use error::{
    CacheError, DigestError, ExecutionError, GraphError, LlmError, ParseError, PdfError,
    StageError,
};
pub use output::{DigestOutput, TokenUsage};
pub use pipeline::Collaborators;
pub use progress::{NoopObserver, WorkflowObserver};
pub use state::{
    DocumentMetadata, GlossaryEntry, PaperState, Section, SectionSummary, StateUpdate,
};
