//! The `summarize` stage: one LLM summary per section, same order.

use crate::error::StageError;
use crate::graph::Stage;
use crate::pipeline::llm::CompletionClient;
use crate::pipeline::map_bounded;
use crate::pipeline::split::preview;
use crate::prompts::render;
use crate::state::{PaperState, Section, SectionSummary, StateUpdate};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Summary text recorded for a section whose summary could not be produced.
pub const SUMMARY_PLACEHOLDER: &str = "[summary unavailable]";

pub struct SummarizeStage {
    llm: Arc<dyn CompletionClient>,
    prompt: String,
    concurrency: usize,
}

impl SummarizeStage {
    pub fn new(llm: Arc<dyn CompletionClient>, prompt: String, concurrency: usize) -> Self {
        Self {
            llm,
            prompt,
            concurrency,
        }
    }

    async fn summarize_one(&self, section: &Section) -> SectionSummary {
        let prompt = render(
            &self.prompt,
            &[("title", &section.title), ("content", &section.content)],
        );
        let summary = match self.llm.complete(&prompt).await {
            Ok(c) if !c.content.trim().is_empty() => c.content.trim().to_string(),
            Ok(_) => {
                warn!("Empty summary for section '{}'", section.title);
                SUMMARY_PLACEHOLDER.to_string()
            }
            Err(e) => {
                warn!(
                    "Summary failed for section '{}': {}\ncontent: {}",
                    section.title,
                    e,
                    preview(&section.content)
                );
                SUMMARY_PLACEHOLDER.to_string()
            }
        };
        SectionSummary {
            title: section.title.clone(),
            summary,
            content: section.content.clone(),
        }
    }
}

fn placeholder_for(section: &Section) -> SectionSummary {
    SectionSummary {
        title: section.title.clone(),
        summary: SUMMARY_PLACEHOLDER.to_string(),
        content: section.content.clone(),
    }
}

#[async_trait]
impl Stage<PaperState> for SummarizeStage {
    async fn run(&self, state: Arc<PaperState>) -> Result<StateUpdate, StageError> {
        let sections = state.require_sections()?;
        info!("Summarizing {} sections", sections.len());

        let items: Vec<&Section> = sections.iter().collect();
        let summaries = map_bounded(items, self.concurrency, |s| self.summarize_one(s)).await;

        let failed = summaries
            .iter()
            .filter(|s| s.summary == SUMMARY_PLACEHOLDER)
            .count();
        if failed > 0 {
            warn!("{}/{} section summaries failed", failed, summaries.len());
        }
        Ok(StateUpdate::summaries(summaries))
    }

    /// Every section with the placeholder summary, so the report still lists
    /// all sections.
    fn degraded(&self, state: &PaperState, _error: &StageError) -> StateUpdate {
        let sections = state.sections.as_deref().unwrap_or_default();
        StateUpdate::summaries(sections.iter().map(placeholder_for).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::pipeline::llm::Completion;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails for any prompt that mentions "Method".
    struct FlakyOnMethod;

    #[async_trait]
    impl CompletionClient for FlakyOnMethod {
        async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
            if prompt.contains("Method") {
                Err(LlmError::Failed {
                    retries: 3,
                    detail: "HTTP 503".into(),
                })
            } else {
                Ok(Completion::text(format!("summary of {prompt}")))
            }
        }
    }

    fn state() -> PaperState {
        let mut state = PaperState::new("p.pdf", "p");
        state.sections = Some(vec![
            Section {
                title: "Intro".into(),
                content: "i".into(),
            },
            Section {
                title: "Method".into(),
                content: "m".into(),
            },
            Section {
                title: "Results".into(),
                content: "r".into(),
            },
        ]);
        state
    }

    #[tokio::test]
    async fn one_failing_section_gets_placeholder() {
        let stage = SummarizeStage::new(Arc::new(FlakyOnMethod), "{title}".into(), 2);
        let summaries = stage.run(Arc::new(state())).await.unwrap().summaries.unwrap();
        let titles: Vec<_> = summaries.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["Intro", "Method", "Results"]);
        assert_eq!(summaries[0].summary, "summary of Intro");
        assert_eq!(summaries[1].summary, SUMMARY_PLACEHOLDER);
        assert_eq!(summaries[1].content, "m");
    }

    /// Tracks how many calls are in flight at once.
    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CompletionClient for Gauge {
        async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Completion::text(format!("summary of {prompt}")))
        }
    }

    #[tokio::test]
    async fn section_calls_stay_within_concurrency() {
        let mut state = PaperState::new("p.pdf", "p");
        state.sections = Some(
            (0..6)
                .map(|i| Section {
                    title: format!("S{i}"),
                    content: "c".into(),
                })
                .collect(),
        );
        let gauge = Arc::new(Gauge::default());
        let stage = SummarizeStage::new(gauge.clone(), "{title}".into(), 2);

        let summaries = stage.run(Arc::new(state)).await.unwrap().summaries.unwrap();

        assert_eq!(summaries.len(), 6);
        assert_eq!(summaries[5].summary, "summary of S5");
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn degraded_output_covers_every_section() {
        let stage = SummarizeStage::new(Arc::new(FlakyOnMethod), "{title}".into(), 2);
        let update = stage.degraded(&state(), &StageError::Other("boom".into()));
        let summaries = update.summaries.unwrap();
        assert_eq!(summaries.len(), 3);
        assert!(summaries.iter().all(|s| s.summary == SUMMARY_PLACEHOLDER));
    }

    #[tokio::test]
    async fn missing_sections_is_reported() {
        let stage = SummarizeStage::new(Arc::new(FlakyOnMethod), "{title}".into(), 2);
        let err = stage
            .run(Arc::new(PaperState::new("p.pdf", "p")))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::MissingInput("sections")));
    }
}
