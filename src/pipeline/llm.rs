//! LLM access for the stages: one prompt in, one completion out.
//!
//! Stages depend on [`CompletionClient`], not on a provider, so tests can
//! script responses. [`ProviderClient`] is the production implementation over
//! an `edgequake_llm` provider.
//!
//! ## Retry Strategy
//!
//! Failed calls are retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`): with 500 ms base and 3 retries the wait
//! sequence is 500 ms → 1 s → 2 s. Each attempt is bounded by
//! `api_timeout_secs`.

use crate::config::DigestConfig;
use crate::error::{DigestError, LlmError};
use crate::output::TokenUsage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Text returned by one completion call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// A single-turn completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError>;

    /// Tokens used so far, if the client tracks them.
    fn usage(&self) -> Option<TokenUsage> {
        None
    }
}

/// [`CompletionClient`] over an `edgequake_llm` provider, with retry,
/// per-call timeout and token accounting.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
    calls: AtomicUsize,
    input_tokens: AtomicUsize,
    output_tokens: AtomicUsize,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &DigestConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
            calls: AtomicUsize::new(0),
            input_tokens: AtomicUsize::new(0),
            output_tokens: AtomicUsize::new(0),
        }
    }

    /// Resolve a provider from `config` and wrap it.
    pub fn from_config(config: &DigestConfig) -> Result<Self, DigestError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1)))
    }
}

#[async_trait]
impl CompletionClient for ProviderClient {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        let start = Instant::now();
        let messages = vec![ChatMessage::user(prompt)];
        let options = self.options();
        let limit = Duration::from_secs(self.api_timeout_secs);

        let mut last_err: Option<LlmError> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.backoff(attempt);
                warn!(
                    "LLM retry {}/{} after {}ms",
                    attempt,
                    self.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            match timeout(limit, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    let input_tokens = response.prompt_tokens as usize;
                    let output_tokens = response.completion_tokens as usize;
                    self.calls.fetch_add(1, Ordering::Relaxed);
                    self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
                    self.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);
                    debug!(
                        "LLM call: {} input tokens, {} output tokens, {:?}",
                        input_tokens,
                        output_tokens,
                        start.elapsed()
                    );
                    return Ok(Completion {
                        content: response.content,
                        input_tokens,
                        output_tokens,
                    });
                }
                Ok(Err(e)) => {
                    warn!("LLM attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(LlmError::Failed {
                        retries: attempt,
                        detail: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        "LLM attempt {} timed out after {}s",
                        attempt + 1,
                        self.api_timeout_secs
                    );
                    last_err = Some(LlmError::Timeout {
                        secs: self.api_timeout_secs,
                    });
                }
            }
        }

        Err(last_err.unwrap_or(LlmError::Failed {
            retries: self.max_retries,
            detail: "no attempt was made".to_string(),
        }))
    }

    fn usage(&self) -> Option<TokenUsage> {
        Some(TokenUsage {
            calls: self.calls.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        })
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DigestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DigestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI, when `OPENAI_API_KEY` is set.
/// 5. `ProviderFactory::from_env` auto-detection.
pub fn resolve_provider(config: &DigestConfig) -> Result<Arc<dyn LLMProvider>, DigestError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DigestError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl CompletionClient for Fixed {
        async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
            Ok(Completion::text(prompt.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn default_usage_is_untracked() {
        let client = Fixed;
        assert_eq!(client.complete("hi").await.unwrap().content, "HI");
        assert!(client.usage().is_none());
    }

    #[test]
    fn completion_text_has_no_tokens() {
        let c = Completion::text("x");
        assert_eq!((c.input_tokens, c.output_tokens), (0, 0));
    }
}
