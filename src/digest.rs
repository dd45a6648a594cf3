//! Top-level entry points.
//!
//! [`digest`] resolves the input, builds the production collaborators
//! (provider-backed LLM client, pdfium text extractor) and runs the workflow.
//! [`digest_with`] takes the collaborators from the caller and is what the
//! integration tests drive.

use crate::config::DigestConfig;
use crate::error::DigestError;
use crate::graph::{Executor, JsonFileCache, StageCache};
use crate::output::DigestOutput;
use crate::pipeline::input::{self, title_from_path};
use crate::pipeline::llm::ProviderClient;
use crate::pipeline::load::PdfiumExtractor;
use crate::pipeline::{build_workflow, pdf, Collaborators};
use crate::prompts::PromptSet;
use crate::state::{DocumentMetadata, PaperState, StateUpdate};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Digest a PDF file or URL into a reading report.
///
/// # Arguments
/// * `input_str`: Local file path or HTTP/HTTPS URL to a PDF
/// * `config`: Digest configuration
///
/// # Returns
/// `Ok(DigestOutput)` when the run completed, even if some stages degraded
/// (check [`DigestOutput::is_degraded`]).
///
/// # Errors
/// Returns `Err(DigestError)` only for fatal errors:
/// - File not found / permission denied / not a PDF
/// - No LLM provider configured
/// - A stage with the abort policy failed
pub async fn digest(
    input_str: impl AsRef<str>,
    config: &DigestConfig,
) -> Result<DigestOutput, DigestError> {
    let input_str = input_str.as_ref();
    info!("Starting digest: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let llm = ProviderClient::from_config(config)?;
    let collaborators = Collaborators::new(Arc::new(llm), Arc::new(PdfiumExtractor));

    // `resolved` keeps a downloaded file alive until the run is over.
    digest_with(resolved.path(), config, collaborators).await
}

/// Run the workflow over a local PDF with caller-supplied collaborators.
pub async fn digest_with(
    pdf_path: &Path,
    config: &DigestConfig,
    collaborators: Collaborators,
) -> Result<DigestOutput, DigestError> {
    let total_start = Instant::now();

    let prompts = match &config.prompt_dir {
        Some(dir) => PromptSet::from_dir(dir).await?,
        None => PromptSet::default(),
    };
    let graph = build_workflow(config, &collaborators, &prompts)?;

    let mut executor = Executor::new(&graph);
    if config.uses_cache() {
        let dir = config
            .cache_dir
            .clone()
            .ok_or_else(|| DigestError::InvalidConfig("cache enabled without a cache directory".into()))?;
        info!("Stage cache: {} (default mode {:?})", dir.display(), config.cache_mode);
        let cache: Arc<dyn StageCache<StateUpdate>> = Arc::new(JsonFileCache::new(dir));
        executor = executor.with_cache(cache, config.cache_mode);
        for (stage, mode) in &config.stage_cache_modes {
            executor = executor.cache_mode(stage.clone(), *mode);
        }
    }
    if let Some(observer) = &config.observer {
        executor = executor.with_observer(Arc::clone(observer));
    }

    let title = config
        .title
        .clone()
        .unwrap_or_else(|| title_from_path(pdf_path));
    let outcome = executor
        .run_with_report(PaperState::new(pdf_path, title))
        .await?;

    let degraded: Vec<&str> = outcome.report.degraded().map(|r| r.stage.as_str()).collect();
    if !degraded.is_empty() {
        warn!("Degraded stages: {}", degraded.join(", "));
    }

    let usage = collaborators.llm.usage();
    if let Some(u) = usage {
        info!(
            "LLM usage: {} calls, {} input tokens, {} output tokens",
            u.calls, u.input_tokens, u.output_tokens
        );
    }
    info!("Digest finished in {:?}", total_start.elapsed());

    Ok(DigestOutput {
        report_path: outcome.state.output_path.clone(),
        state: outcome.state,
        report: outcome.report,
        usage,
    })
}

/// Synchronous wrapper around [`digest`].
///
/// Creates a temporary tokio runtime internally.
pub fn digest_sync(
    input_str: impl AsRef<str>,
    config: &DigestConfig,
) -> Result<DigestOutput, DigestError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DigestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(digest(input_str, config))
}

/// Extract PDF metadata without running the workflow.
///
/// Honours the configured download timeout and document password. Does not
/// require an LLM provider or API key.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &DigestConfig,
) -> Result<DocumentMetadata, DigestError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let path = resolved.path().to_path_buf();
    let password = config.password.clone();

    tokio::task::spawn_blocking(move || {
        let pdfium = pdf::bind_pdfium()?;
        let document = pdf::open_document(&pdfium, &path, password.as_deref())?;
        Ok(pdf::read_metadata(&document))
    })
    .await
    .map_err(|e| DigestError::Internal(format!("Metadata task panicked: {}", e)))?
}
