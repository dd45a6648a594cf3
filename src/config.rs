//! Configuration for a paper digest run.
//!
//! Every knob lives in [`DigestConfig`], built via [`DigestConfigBuilder`].
//! Defaults describe the standard run: whole-document split, five concurrent
//! LLM calls per stage, no cache, and a PDF report at `report.pdf`.

use crate::error::DigestError;
use crate::graph::{CacheMode, FailurePolicy};
use crate::pipeline::stages;
use crate::progress::WorkflowObserver;
use edgequake_llm::LLMProvider;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one digest run.
///
/// # Example
/// ```rust
/// use pdf_digest::DigestConfig;
///
/// let config = DigestConfig::builder()
///     .model("gpt-4.1-mini")
///     .concurrency(3)
///     .output_path("attention.md")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 3);
/// ```
#[derive(Clone)]
pub struct DigestConfig {
    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is picked from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens generated per call. Default: 4096.
    ///
    /// The split prompt returns the paper text reorganised into sections, so
    /// long papers need this raised or `split_chunk_chars` set.
    pub max_tokens: usize,

    /// Retry attempts on a failed LLM call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Admission limit for per-section and per-chunk LLM calls inside one
    /// stage. Default: 5, minimum 1.
    pub concurrency: usize,

    /// Where the report is written. `.md` / `.markdown` produce Markdown,
    /// anything else a PDF. Default: `report.pdf`.
    pub output_path: PathBuf,

    /// Directory with prompt template overrides. Missing files fall back to
    /// the built-in prompts.
    pub prompt_dir: Option<PathBuf>,

    /// Directory for the stage-output cache. Required when any cache mode
    /// other than `Disabled` is used.
    pub cache_dir: Option<PathBuf>,

    /// Cache mode applied to every stage without an override. Default: Disabled.
    pub cache_mode: CacheMode,

    /// Per-stage cache mode overrides, keyed by stage name.
    pub stage_cache_modes: HashMap<String, CacheMode>,

    /// Per-stage failure policy overrides, keyed by stage name.
    ///
    /// Without an override `load` and `split` abort the run; every other
    /// stage degrades.
    pub failure_policies: HashMap<String, FailurePolicy>,

    /// Chunk size in characters for chunked splitting. None splits the whole
    /// document in one call. Default: None.
    pub split_chunk_chars: Option<usize>,

    /// Characters shared by consecutive chunks. Default: 2000.
    pub split_chunk_overlap: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Report title. If None, the input file name without extension.
    pub title: Option<String>,

    /// Receives stage lifecycle events.
    pub observer: Option<Arc<dyn WorkflowObserver>>,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            concurrency: 5,
            output_path: PathBuf::from("report.pdf"),
            prompt_dir: None,
            cache_dir: None,
            cache_mode: CacheMode::Disabled,
            stage_cache_modes: HashMap::new(),
            failure_policies: HashMap::new(),
            split_chunk_chars: None,
            split_chunk_overlap: 2000,
            password: None,
            download_timeout_secs: 120,
            title: None,
            observer: None,
        }
    }
}

impl fmt::Debug for DigestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("output_path", &self.output_path)
            .field("prompt_dir", &self.prompt_dir)
            .field("cache_dir", &self.cache_dir)
            .field("cache_mode", &self.cache_mode)
            .field("stage_cache_modes", &self.stage_cache_modes)
            .field("failure_policies", &self.failure_policies)
            .field("split_chunk_chars", &self.split_chunk_chars)
            .field("title", &self.title)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn WorkflowObserver>"))
            .finish()
    }
}

impl DigestConfig {
    /// Create a new builder for `DigestConfig`.
    pub fn builder() -> DigestConfigBuilder {
        DigestConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective failure policy for `stage`.
    pub fn policy_for(&self, stage: &str) -> FailurePolicy {
        if let Some(policy) = self.failure_policies.get(stage) {
            return *policy;
        }
        match stage {
            stages::LOAD | stages::SPLIT => FailurePolicy::Abort,
            _ => FailurePolicy::Degrade,
        }
    }

    /// Effective cache mode for `stage`. `export` writes the report file, so
    /// it is never cached.
    pub fn cache_mode_for(&self, stage: &str) -> CacheMode {
        if stage == stages::EXPORT {
            return CacheMode::Disabled;
        }
        self.stage_cache_modes
            .get(stage)
            .copied()
            .unwrap_or(self.cache_mode)
    }

    /// True if any stage reads or writes the cache.
    pub fn uses_cache(&self) -> bool {
        self.cache_mode != CacheMode::Disabled
            || self
                .stage_cache_modes
                .values()
                .any(|m| *m != CacheMode::Disabled)
    }
}

/// Builder for [`DigestConfig`].
pub struct DigestConfigBuilder {
    config: DigestConfig,
}

impl fmt::Debug for DigestConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl DigestConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.prompt_dir = Some(dir.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.config.cache_mode = mode;
        self
    }

    /// Override the cache mode of one stage.
    pub fn stage_cache_mode(mut self, stage: impl Into<String>, mode: CacheMode) -> Self {
        self.config.stage_cache_modes.insert(stage.into(), mode);
        self
    }

    /// Override the failure policy of one stage.
    pub fn failure_policy(mut self, stage: impl Into<String>, policy: FailurePolicy) -> Self {
        self.config.failure_policies.insert(stage.into(), policy);
        self
    }

    /// Make every stage abort the run on failure.
    pub fn strict(mut self) -> Self {
        for stage in stages::ALL {
            self.config
                .failure_policies
                .insert(stage.to_string(), FailurePolicy::Abort);
        }
        self
    }

    pub fn split_chunk_chars(mut self, chars: usize) -> Self {
        self.config.split_chunk_chars = Some(chars);
        self
    }

    pub fn split_chunk_overlap(mut self, chars: usize) -> Self {
        self.config.split_chunk_overlap = chars;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    pub fn observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DigestConfig, DigestError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(DigestError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if let Some(chunk) = c.split_chunk_chars {
            if chunk == 0 {
                return Err(DigestError::InvalidConfig(
                    "split chunk size must be ≥ 1".into(),
                ));
            }
            if c.split_chunk_overlap >= chunk {
                return Err(DigestError::InvalidConfig(format!(
                    "split chunk overlap ({}) must be smaller than the chunk size ({})",
                    c.split_chunk_overlap, chunk
                )));
            }
        }
        if c.output_path.as_os_str().is_empty() {
            return Err(DigestError::InvalidConfig("output path is empty".into()));
        }
        if c.uses_cache() && c.cache_dir.is_none() {
            return Err(DigestError::InvalidConfig(
                "a cache directory is required when caching is enabled".into(),
            ));
        }
        let known = |name: &String| stages::ALL.contains(&name.as_str());
        if let Some(name) = c
            .failure_policies
            .keys()
            .chain(c.stage_cache_modes.keys())
            .find(|n| !known(n))
        {
            return Err(DigestError::InvalidConfig(format!(
                "unknown stage '{}' (expected one of: {})",
                name,
                stages::ALL.join(", ")
            )));
        }
        Ok(self.config)
    }
}
