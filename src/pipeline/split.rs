//! The `split` stage: full text → ordered, de-duplicated sections.
//!
//! By default the whole text goes to the LLM in one call. With
//! `split_chunk_chars` set, the text is cut into overlapping chunks that are
//! split concurrently; sections whose titles recur across chunks (or within
//! one response) are merged afterwards by [`merge_sections`].

use crate::config::DigestConfig;
use crate::error::{LlmError, StageError};
use crate::graph::Stage;
use crate::pipeline::json::parse_json;
use crate::pipeline::llm::CompletionClient;
use crate::pipeline::map_bounded;
use crate::prompts::render;
use crate::state::{PaperState, Section, StateUpdate};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Overlapping chunking parameters, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunking {
    pub size: usize,
    pub overlap: usize,
}

pub struct SplitStage {
    llm: Arc<dyn CompletionClient>,
    prompt: String,
    chunking: Option<Chunking>,
    concurrency: usize,
}

impl SplitStage {
    pub fn new(llm: Arc<dyn CompletionClient>, prompt: String, config: &DigestConfig) -> Self {
        Self {
            llm,
            prompt,
            chunking: config.split_chunk_chars.map(|size| Chunking {
                size,
                overlap: config.split_chunk_overlap,
            }),
            concurrency: config.concurrency,
        }
    }
}

/// Lenient shape of one section in the LLM response.
#[derive(Deserialize)]
struct RawSection {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

/// Outcome of splitting one unit of text.
enum ChunkResult {
    Sections(Vec<Section>),
    LlmFailed(LlmError),
    Unparsed,
}

#[async_trait]
impl Stage<PaperState> for SplitStage {
    async fn run(&self, state: Arc<PaperState>) -> Result<StateUpdate, StageError> {
        let text = state.require_text()?;
        let chunks = match self.chunking {
            Some(c) => chunk_text(text, c.size, c.overlap),
            None => vec![text.to_string()],
        };
        let total = chunks.len();
        info!("Splitting {} chars in {} chunk(s)", text.len(), total);

        let results = map_bounded(chunks, self.concurrency, |chunk| self.split_chunk(chunk)).await;

        let mut sections = Vec::new();
        let mut llm_failures = 0usize;
        let mut last_llm_err = None;
        let mut unparsed = 0usize;
        for result in results {
            match result {
                ChunkResult::Sections(found) => sections.extend(found),
                ChunkResult::LlmFailed(e) => {
                    llm_failures += 1;
                    last_llm_err = Some(e);
                }
                // Already logged with the chunk; the unit contributes nothing.
                ChunkResult::Unparsed => unparsed += 1,
            }
        }

        if llm_failures == total {
            if let Some(e) = last_llm_err {
                return Err(StageError::Llm(e));
            }
        }

        let merged = merge_sections(sections);
        if merged.is_empty() {
            warn!(
                "Split produced no sections ({} of {} chunk(s) unparseable)",
                unparsed, total
            );
        }
        info!("Split into {} sections", merged.len());
        Ok(StateUpdate::sections(merged))
    }
}

impl SplitStage {
    async fn split_chunk(&self, chunk: String) -> ChunkResult {
        let prompt = render(&self.prompt, &[("text", &chunk)]);
        let completion = match self.llm.complete(&prompt).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Chunk failed, skipping: {}\nchunk: {}", e, preview(&chunk));
                return ChunkResult::LlmFailed(e);
            }
        };
        match parse_json::<Vec<RawSection>>(&completion.content) {
            Ok(raw) => {
                let sections: Vec<Section> = raw
                    .into_iter()
                    .filter(|s| !(s.title.trim().is_empty() && s.content.trim().is_empty()))
                    .map(|s| Section {
                        title: if s.title.trim().is_empty() {
                            "Untitled".to_string()
                        } else {
                            s.title
                        },
                        content: s.content,
                    })
                    .collect();
                debug!("Chunk yielded {} sections", sections.len());
                ChunkResult::Sections(sections)
            }
            Err(e) => {
                warn!(
                    "Chunk response is not valid JSON, skipping: {}\nchunk: {}\nresponse: {}",
                    e,
                    preview(&chunk),
                    preview(&e.raw)
                );
                ChunkResult::Unparsed
            }
        }
    }
}

/// First 200 characters of `s`, for log lines.
pub(crate) fn preview(s: &str) -> String {
    const MAX: usize = 200;
    match s.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Key under which titles are considered the same section.
fn title_key(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Merge sections whose titles match after trimming, whitespace collapsing
/// and lowercasing.
///
/// The merged section sits at the position of the first occurrence and keeps
/// its title; contents are trimmed and joined with `"\n"`.
pub fn merge_sections(sections: Vec<Section>) -> Vec<Section> {
    let mut merged: Vec<Section> = Vec::with_capacity(sections.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for section in sections {
        let key = title_key(&section.title);
        let content = section.content.trim();
        match index.get(&key) {
            Some(&pos) => {
                if !content.is_empty() {
                    let existing = &mut merged[pos].content;
                    if !existing.is_empty() {
                        existing.push('\n');
                    }
                    existing.push_str(content);
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(Section {
                    title: section.title.trim().to_string(),
                    content: content.to_string(),
                });
            }
        }
    }
    merged
}

/// Cut `text` into windows of at most `size` characters, consecutive windows
/// sharing up to `overlap` characters. Windows end at a line break or
/// whitespace in their second half when one exists.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    if chars.iter().all(|c| c.is_whitespace()) {
        return Vec::new();
    }
    if chars.len() <= size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let hard_end = (start + size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            soft_break(&chars, start, hard_end)
        };
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }
    chunks
}

fn soft_break(chars: &[char], start: usize, hard_end: usize) -> usize {
    let floor = start + (hard_end - start) / 2;
    (floor..hard_end)
        .rev()
        .find(|&i| chars[i] == '\n')
        .or_else(|| (floor..hard_end).rev().find(|&i| chars[i].is_whitespace()))
        .map(|i| i + 1)
        .unwrap_or(hard_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::Completion;
    use std::sync::Mutex;

    fn section(title: &str, content: &str) -> Section {
        Section {
            title: title.into(),
            content: content.into(),
        }
    }

    #[test]
    fn duplicate_titles_merge_with_newline() {
        let merged = merge_sections(vec![
            section("Introduction", "A"),
            section("Method", "M"),
            section("Introduction", "B"),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], section("Introduction", "A\nB"));
        assert_eq!(merged[1].title, "Method");
    }

    #[test]
    fn title_normalisation_ignores_case_and_spacing() {
        let merged = merge_sections(vec![
            section("  Related   Work", " x "),
            section("related work", "y"),
        ]);
        assert_eq!(merged, vec![section("Related   Work", "x\ny")]);
    }

    #[test]
    fn chunks_overlap_and_cover_text() {
        let text: String = ('a'..='y').collect();
        let chunks = chunk_text(&text, 10, 3);
        assert_eq!(chunks, vec!["abcdefghij", "hijklmnopq", "opqrstuvwx", "vwxy"]);
    }

    #[test]
    fn chunks_prefer_line_breaks() {
        let text = "first line\nsecond line\nthird";
        let chunks = chunk_text(text, 16, 0);
        assert_eq!(chunks[0], "first line\n");
        assert!(chunks.iter().all(|c| c.chars().count() <= 16));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn short_or_blank_text() {
        assert_eq!(chunk_text("short", 100, 10), vec!["short"]);
        assert!(chunk_text("   ", 100, 10).is_empty());
    }

    struct Scripted {
        responses: Mutex<Vec<Result<String, LlmError>>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<&str, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        async fn complete(&self, _prompt: &str) -> Result<Completion, LlmError> {
            let next = self.responses.lock().unwrap().pop();
            next.unwrap_or_else(|| Ok("[]".to_string())).map(Completion::text)
        }
    }

    fn state_with_text(text: &str) -> Arc<PaperState> {
        let mut state = PaperState::new("p.pdf", "p");
        state.paper_text = Some(text.to_string());
        Arc::new(state)
    }

    fn stage(llm: Scripted, chunk: Option<usize>) -> SplitStage {
        let mut builder = DigestConfig::builder().split_chunk_overlap(0).concurrency(1);
        if let Some(size) = chunk {
            builder = builder.split_chunk_chars(size);
        }
        SplitStage::new(Arc::new(llm), "{text}".into(), &builder.build().unwrap())
    }

    #[tokio::test]
    async fn whole_document_split_merges_duplicates() {
        let llm = Scripted::new(vec![Ok(r#"```json
[{"title": "Introduction", "content": "A"},
 {"title": "introduction", "content": "B"},
 {"title": "Results", "content": "R"}]
```"#)]);
        let update = stage(llm, None).run(state_with_text("paper")).await.unwrap();
        let sections = update.sections.unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], section("Introduction", "A\nB"));
    }

    #[tokio::test]
    async fn failed_chunk_is_skipped() {
        let llm = Scripted::new(vec![
            Ok(r#"[{"title": "Intro", "content": "x"}]"#),
            Err(LlmError::Timeout { secs: 1 }),
            Ok("not json at all"),
        ]);
        let text = "aaaa bbbb cccc dddd eeee ffff";
        let update = stage(llm, Some(10)).run(state_with_text(text)).await.unwrap();
        assert_eq!(update.sections.unwrap(), vec![section("Intro", "x")]);
    }

    #[tokio::test]
    async fn all_chunks_failing_fails_the_stage() {
        let llm = Scripted::new(vec![
            Err(LlmError::Timeout { secs: 1 }),
            Err(LlmError::Timeout { secs: 1 }),
        ]);
        let err = stage(llm, Some(10))
            .run(state_with_text("aaaa bbbb cccc dd"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Llm(_)));
    }

    #[tokio::test]
    async fn unparseable_whole_document_yields_no_sections() {
        let llm = Scripted::new(vec![Ok("Sorry, I cannot help with that.")]);
        let update = stage(llm, None).run(state_with_text("paper")).await.unwrap();
        assert_eq!(update.sections, Some(vec![]));
    }

    #[tokio::test]
    async fn typographic_quotes_in_content_parse() {
        let llm = Scripted::new(vec![Ok(
            "[{\"title\": \"Intro\", \"content\": \"the \u{201C}attention\u{201D} model\"}]",
        )]);
        let update = stage(llm, None).run(state_with_text("paper")).await.unwrap();
        assert_eq!(
            update.sections.unwrap(),
            vec![section("Intro", "the \u{201C}attention\u{201D} model")]
        );
    }

    #[tokio::test]
    async fn missing_text_is_reported() {
        let llm = Scripted::new(vec![]);
        let err = stage(llm, None)
            .run(Arc::new(PaperState::new("p.pdf", "p")))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::MissingInput("paper_text")));
    }
}
