//! Error types for the pdf-digest library.
//!
//! The errors are layered the same way the work is layered:
//!
//! * [`GraphError`]: the workflow graph is malformed. Raised by
//!   [`crate::graph::WorkflowGraph::compile`] and the builder methods; always
//!   fatal, never retried.
//!
//! * [`StageError`]: why a single stage failed. Whether this aborts the run
//!   or is swallowed depends on the stage's
//!   [`crate::graph::FailurePolicy`].
//!
//! * [`ExecutionError`]: an aborted run, naming the stage that caused it.
//!
//! * [`ParseError`] / [`LlmError`]: failures of one unit of work inside a
//!   stage (one chunk, one section). Stages recover from these locally.
//!
//! * [`DigestError`]: **Fatal** errors returned by the top-level
//!   `digest*` functions.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-digest entry points.
#[derive(Debug, Error)]
pub enum DigestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// pdfium could not be bound or could not open the document.
    #[error(transparent)]
    Pdf(#[from] PdfError),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A prompt template file exists but could not be read.
    #[error("Failed to read prompt template '{path}': {source}")]
    PromptLoadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Workflow errors ───────────────────────────────────────────────────
    /// The stage graph failed validation.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A stage configured to abort the run failed.
    #[error(transparent)]
    Workflow(#[from] ExecutionError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Graph construction and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// `add_stage` was called twice with the same name.
    #[error("stage '{0}' is already registered")]
    DuplicateStage(String),

    /// An edge or the entry point names a stage that was never registered.
    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    /// The dependency edges contain a cycle.
    #[error("cycle detected: {}", path.join(" -> "))]
    CyclicGraph { path: Vec<String> },

    /// A stage cannot be reached from the entry stage.
    #[error("stage '{0}' is not reachable from the entry stage")]
    DisconnectedStage(String),

    /// `compile` was called before `set_entry`.
    #[error("no entry stage was set")]
    MissingEntry,

    /// The END sentinel was used in a way that leaves the terminal ambiguous.
    #[error("invalid terminal: {0}")]
    InvalidTerminal(String),
}

/// pdfium failures, shared by text extraction, `inspect` and the PDF
/// report renderer.
#[derive(Debug, Error)]
pub enum PdfError {
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
         Install libpdfium or point PDFIUM_LIB_PATH at the library file."
    )]
    BindingFailed(String),

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium rejected the file.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },
}

/// Why one stage invocation failed.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage read a state field that no earlier stage produced.
    #[error("required state field '{0}' has not been produced")]
    MissingInput(&'static str),

    /// The external language-model service failed.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The service answered, but its output could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// PDF text extraction failed.
    #[error("text extraction failed for '{path}': {detail}")]
    Extraction { path: PathBuf, detail: String },

    /// pdfium could not be bound or could not open the document.
    #[error(transparent)]
    Pdf(#[from] PdfError),

    /// Reading or writing a file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The report artifact could not be produced.
    #[error("report rendering failed: {0}")]
    Render(String),

    /// Anything else a stage wants to report.
    #[error("{0}")]
    Other(String),
}

/// A run aborted because of a stage failure.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A stage with the abort policy returned an error.
    #[error("stage '{stage}' failed: {cause}")]
    StageFailed {
        stage: String,
        #[source]
        cause: StageError,
    },

    /// A stage panicked while running.
    #[error("stage '{stage}' panicked: {message}")]
    StagePanicked { stage: String, message: String },

    /// A stage's task was cancelled before it finished.
    #[error("stage '{stage}' was cancelled")]
    StageCancelled { stage: String },

    /// No stage was ready but some never ran.
    #[error("workflow stalled with {} stage(s) pending: {}", pending.len(), pending.join(", "))]
    Stalled { pending: Vec<String> },
}

impl ExecutionError {
    /// Name of the stage responsible for the failure, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            ExecutionError::StageFailed { stage, .. }
            | ExecutionError::StagePanicked { stage, .. }
            | ExecutionError::StageCancelled { stage } => Some(stage),
            ExecutionError::Stalled { .. } => None,
        }
    }
}

/// Malformed structured output from the LLM, after repair was attempted.
#[derive(Debug, Clone, Error)]
#[error("could not parse LLM output as JSON: {detail}")]
pub struct ParseError {
    pub detail: String,
    /// The raw (unrepaired) response, kept for diagnosis.
    pub raw: String,
}

/// A failed completion request.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// The provider returned an error after all retries.
    #[error("LLM call failed after {retries} retries: {detail}")]
    Failed { retries: u32, detail: String },

    /// The call did not finish within the configured timeout.
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Failures of the stage-output cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry '{path}' is not valid JSON: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
