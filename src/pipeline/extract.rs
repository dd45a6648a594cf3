//! The three extraction stages that fan out from `summarize`: glossary,
//! insights and questions.
//!
//! Each issues one LLM call per section summary under the admission limit,
//! recovers locally from failed or malformed responses, and deduplicates the
//! flattened result by a case-insensitive key, keeping the first occurrence.

use crate::error::{LlmError, StageError};
use crate::graph::Stage;
use crate::pipeline::json::parse_json;
use crate::pipeline::llm::CompletionClient;
use crate::pipeline::map_bounded;
use crate::pipeline::split::preview;
use crate::prompts::render;
use crate::state::{GlossaryEntry, PaperState, SectionSummary, StateUpdate};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

fn render_for(template: &str, s: &SectionSummary) -> String {
    render(
        template,
        &[
            ("title", &s.title),
            ("summary", &s.summary),
            ("content", &s.content),
        ],
    )
}

/// Call the LLM once per summary. Failed calls are logged and yield `None`.
/// Returns an error only when there was at least one call and all failed.
async fn complete_each(
    llm: &dyn CompletionClient,
    template: &str,
    summaries: &[SectionSummary],
    concurrency: usize,
    stage: &str,
) -> Result<Vec<(String, Option<String>)>, LlmError> {
    let items: Vec<&SectionSummary> = summaries.iter().collect();
    let results = map_bounded(items, concurrency, |s| async move {
        let outcome = llm.complete(&render_for(template, s)).await;
        (s, outcome)
    })
    .await;

    let total = results.len();
    let mut last_err = None;
    let mut out = Vec::with_capacity(total);
    for (s, outcome) in results {
        match outcome {
            Ok(c) => out.push((s.title.clone(), Some(c.content))),
            Err(e) => {
                warn!("{}", call_failure(stage, s, &e));
                last_err = Some(e);
                out.push((s.title.clone(), None));
            }
        }
    }
    match last_err {
        Some(e) if out.iter().all(|(_, r)| r.is_none()) => Err(e),
        _ => Ok(out),
    }
}

fn call_failure(stage: &str, s: &SectionSummary, err: &LlmError) -> String {
    format!(
        "{}: call failed for section '{}', skipping: {}\ncontent: {}",
        stage,
        s.title,
        err,
        preview(&s.content)
    )
}

// ── Glossary ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    term: String,
    #[serde(default)]
    definition: String,
}

pub struct GlossaryStage {
    llm: Arc<dyn CompletionClient>,
    prompt: String,
    concurrency: usize,
}

impl GlossaryStage {
    pub fn new(llm: Arc<dyn CompletionClient>, prompt: String, concurrency: usize) -> Self {
        Self {
            llm,
            prompt,
            concurrency,
        }
    }
}

#[async_trait]
impl Stage<PaperState> for GlossaryStage {
    async fn run(&self, state: Arc<PaperState>) -> Result<StateUpdate, StageError> {
        let summaries = state.require_summaries()?;
        let responses = complete_each(
            self.llm.as_ref(),
            &self.prompt,
            summaries,
            self.concurrency,
            "glossary",
        )
        .await?;

        let mut entries = Vec::new();
        for (title, response) in responses {
            let Some(response) = response else { continue };
            match parse_json::<Vec<RawEntry>>(&response) {
                Ok(raw) => entries.extend(raw.into_iter().map(|e| GlossaryEntry {
                    term: e.term,
                    definition: e.definition,
                })),
                Err(e) => warn!(
                    "glossary: unparseable response for section '{}', skipping: {}\nresponse: {}",
                    title,
                    e,
                    preview(&e.raw)
                ),
            }
        }

        let glossary = dedup_glossary(entries);
        info!("Glossary: {} terms", glossary.len());
        Ok(StateUpdate::glossary(glossary))
    }

    fn degraded(&self, _state: &PaperState, _error: &StageError) -> StateUpdate {
        StateUpdate::glossary(Vec::new())
    }
}

/// Drop entries with an empty term and later duplicates of a term
/// (compared trimmed and lowercased).
pub fn dedup_glossary(entries: Vec<GlossaryEntry>) -> Vec<GlossaryEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter_map(|e| {
            let term = e.term.trim();
            if term.is_empty() || !seen.insert(term.to_lowercase()) {
                return None;
            }
            Some(GlossaryEntry {
                term: term.to_string(),
                definition: e.definition.trim().to_string(),
            })
        })
        .collect()
}

// ── Insights and questions ──────────────────────────────────────────────────

/// Which list a [`ListStage`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Insights,
    Questions,
}

impl ListKind {
    fn name(self) -> &'static str {
        match self {
            ListKind::Insights => "insights",
            ListKind::Questions => "questions",
        }
    }

    fn update(self, items: Vec<String>) -> StateUpdate {
        match self {
            ListKind::Insights => StateUpdate::insights(items),
            ListKind::Questions => StateUpdate::questions(items),
        }
    }
}

/// Produces a bulleted list (insights or review questions) from the summaries.
pub struct ListStage {
    kind: ListKind,
    llm: Arc<dyn CompletionClient>,
    prompt: String,
    concurrency: usize,
}

impl ListStage {
    pub fn insights(llm: Arc<dyn CompletionClient>, prompt: String, concurrency: usize) -> Self {
        Self {
            kind: ListKind::Insights,
            llm,
            prompt,
            concurrency,
        }
    }

    pub fn questions(llm: Arc<dyn CompletionClient>, prompt: String, concurrency: usize) -> Self {
        Self {
            kind: ListKind::Questions,
            llm,
            prompt,
            concurrency,
        }
    }
}

#[async_trait]
impl Stage<PaperState> for ListStage {
    async fn run(&self, state: Arc<PaperState>) -> Result<StateUpdate, StageError> {
        let summaries = state.require_summaries()?;
        let name = self.kind.name();
        let responses = complete_each(
            self.llm.as_ref(),
            &self.prompt,
            summaries,
            self.concurrency,
            name,
        )
        .await?;

        let items = dedup_items(
            responses
                .into_iter()
                .filter_map(|(_, r)| r)
                .flat_map(|r| parse_list_items(&r))
                .collect(),
        );
        info!("{}: {} items", name, items.len());
        Ok(self.kind.update(items))
    }

    fn degraded(&self, _state: &PaperState, _error: &StageError) -> StateUpdate {
        self.kind.update(Vec::new())
    }
}

static RE_LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*•+]\s+|\d{1,3}[.)]\s+)").unwrap());

/// Split a list response into items: one per non-empty line, bullet and
/// numbering markers removed, markdown fences and headings skipped.
pub fn parse_list_items(response: &str) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("```") && !l.starts_with('#'))
        .map(|l| RE_LIST_MARKER.replace(l, "").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Drop later case-insensitive duplicates.
pub fn dedup_items(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|i| seen.insert(i.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::Completion;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn entry(term: &str, definition: &str) -> GlossaryEntry {
        GlossaryEntry {
            term: term.into(),
            definition: definition.into(),
        }
    }

    fn summary(title: &str) -> SectionSummary {
        SectionSummary {
            title: title.into(),
            summary: format!("{title} summary"),
            content: format!("{title} content"),
        }
    }

    fn state(titles: &[&str]) -> Arc<PaperState> {
        let mut state = PaperState::new("p.pdf", "p");
        state.summaries = Some(titles.iter().map(|t| summary(t)).collect());
        Arc::new(state)
    }

    /// Answers with a fixed response per section title found in the prompt.
    struct ByTitle(Vec<(&'static str, Result<&'static str, ()>)>);

    #[async_trait]
    impl CompletionClient for ByTitle {
        async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
            for (title, response) in &self.0 {
                if prompt.contains(title) {
                    return response
                        .map(Completion::text)
                        .map_err(|_| LlmError::Timeout { secs: 1 });
                }
            }
            Ok(Completion::text(""))
        }
    }

    #[test]
    fn glossary_dedup_is_case_insensitive_first_wins() {
        let out = dedup_glossary(vec![
            entry("API", "application programming interface"),
            entry("api", "something else"),
            entry("  ", "no term"),
            entry(" Transformer ", " a model "),
        ]);
        assert_eq!(
            out,
            vec![
                entry("API", "application programming interface"),
                entry("Transformer", "a model"),
            ]
        );
    }

    #[test]
    fn list_items_strip_markers() {
        let items = parse_list_items("```\n- First insight\n* second\n2) third\n10. fourth\n\n# Heading\n• fifth\n```");
        assert_eq!(items, ["First insight", "second", "third", "fourth", "fifth"]);
    }

    #[test]
    fn items_dedup_ignores_case() {
        let items = dedup_items(vec!["Why attention?".into(), "why attention?".into(), "How?".into()]);
        assert_eq!(items, ["Why attention?", "How?"]);
    }

    #[tokio::test]
    async fn glossary_stage_skips_bad_units() {
        let llm = ByTitle(vec![
            ("Intro", Ok(r#"[{"term": "API", "definition": "first"}]"#)),
            ("Method", Ok("no json here")),
            ("Results", Ok(r#"[{"term": "api", "definition": "second"}, {"term": "BLEU"}]"#)),
            ("Extra", Err(())),
        ]);
        let stage = GlossaryStage::new(Arc::new(llm), "{title}".into(), 2);
        let glossary = stage
            .run(state(&["Intro", "Method", "Results", "Extra"]))
            .await
            .unwrap()
            .glossary
            .unwrap();
        assert_eq!(glossary, vec![entry("API", "first"), entry("BLEU", "")]);
    }

    #[tokio::test]
    async fn all_calls_failing_fails_the_stage() {
        let llm = ByTitle(vec![("Intro", Err(())), ("Method", Err(()))]);
        let stage = ListStage::questions(Arc::new(llm), "{title}".into(), 2);
        let err = stage.run(state(&["Intro", "Method"])).await.unwrap_err();
        assert!(matches!(err, StageError::Llm(_)));
    }

    #[tokio::test]
    async fn insights_stage_flattens_in_section_order() {
        let llm = ByTitle(vec![
            ("Intro", Ok("- Attention replaces recurrence\n- Training is parallel")),
            ("Results", Ok("1. training is parallel\n2. BLEU improves")),
        ]);
        let stage = ListStage::insights(Arc::new(llm), "{title}".into(), 5);
        let update = stage.run(state(&["Intro", "Results"])).await.unwrap();
        assert!(update.questions.is_none());
        assert_eq!(
            update.insights.unwrap(),
            ["Attention replaces recurrence", "Training is parallel", "BLEU improves"]
        );
    }

    #[test]
    fn call_failure_names_section_and_content() {
        let mut s = summary("Method");
        s.content = "We train on WMT 2014".into();
        let msg = call_failure("glossary", &s, &LlmError::Timeout { secs: 30 });
        assert!(msg.starts_with("glossary: call failed for section 'Method'"));
        assert!(msg.ends_with("content: We train on WMT 2014"));
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
            Ok(Completion::text(format!("- insight on {prompt}")))
        }
    }

    #[tokio::test]
    async fn section_calls_stay_within_concurrency() {
        let gauge = Arc::new(Gauge::default());
        let stage = ListStage::insights(gauge.clone(), "{title}".into(), 3);
        let titles = ["a", "b", "c", "d", "e", "f", "g"];
        let insights = stage.run(state(&titles)).await.unwrap().insights.unwrap();
        assert_eq!(insights.len(), 7);
        assert_eq!(insights[0], "insight on a");
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn degraded_lists_are_empty_not_absent() {
        let llm = ByTitle(vec![]);
        let stage = ListStage::questions(Arc::new(llm), String::new(), 1);
        let update = stage.degraded(&PaperState::default(), &StageError::Other("x".into()));
        assert_eq!(update.questions, Some(Vec::new()));
    }
}
