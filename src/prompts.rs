//! Prompt templates for the LLM-backed stages.
//!
//! Each stage has one template with `{placeholder}` slots. The built-in
//! defaults below are used unless [`PromptSet::from_dir`] finds an override
//! file for that stage (`split.txt`, `summary.txt`, `glossary.txt`,
//! `insights.txt`, `questions.txt`).
//!
//! Only the placeholders listed for a template are substituted, so literal
//! JSON braces in a template need no escaping.

use crate::error::DigestError;
use std::path::Path;
use tracing::debug;

/// Split the full paper text into titled sections. Placeholder: `{text}`.
pub const DEFAULT_SPLIT_PROMPT: &str = r#"You are an expert reader of academic papers. Split the paper text below into its logical sections.

Rules:
- Use the paper's own section headings as titles (e.g. "Abstract", "Introduction", "Method", "Experiments", "Conclusion").
- Keep the original text of each section as its content; do not summarise.
- Skip references, acknowledgements and page furniture (headers, footers, page numbers).

Return ONLY a JSON array, no commentary:
[{"title": "...", "content": "..."}]

Paper text:
"""
{text}
""""#;

/// Summarise one section. Placeholders: `{title}`, `{content}`.
pub const DEFAULT_SUMMARY_PROMPT: &str = r#"Summarise the following section of an academic paper for a careful reader.

Write 3-6 sentences covering the section's purpose, its key claims or methods, and any numbers that matter. Output plain prose only.

Section title: {title}

Section content:
"""
{content}
""""#;

/// Extract glossary terms from one section.
/// Placeholders: `{title}`, `{summary}`, `{content}`.
pub const DEFAULT_GLOSSARY_PROMPT: &str = r#"From the section below, extract the technical terms a newcomer would need explained.

Return ONLY a JSON array, no commentary:
[{"term": "...", "definition": "one or two sentences"}]

Return [] if there are no such terms.

Section title: {title}
Summary: {summary}

Content:
"""
{content}
""""#;

/// Extract insights from one section.
/// Placeholders: `{title}`, `{summary}`, `{content}`.
pub const DEFAULT_INSIGHTS_PROMPT: &str = r#"Read the section below and state its most important insights: non-obvious findings, design decisions, or implications.

Return a bulleted list, one insight per line, starting each line with "- ". No other text.

Section title: {title}
Summary: {summary}

Content:
"""
{content}
""""#;

/// Generate review questions for one section.
/// Placeholders: `{title}`, `{summary}`, `{content}`.
pub const DEFAULT_QUESTIONS_PROMPT: &str = r#"Write questions that test a reader's understanding of the section below. Prefer questions about why and how over recall of facts.

Return a bulleted list, one question per line, starting each line with "- ". No other text.

Section title: {title}
Summary: {summary}

Content:
"""
{content}
""""#;

/// The five stage templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub split: String,
    pub summary: String,
    pub glossary: String,
    pub insights: String,
    pub questions: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            split: DEFAULT_SPLIT_PROMPT.to_string(),
            summary: DEFAULT_SUMMARY_PROMPT.to_string(),
            glossary: DEFAULT_GLOSSARY_PROMPT.to_string(),
            insights: DEFAULT_INSIGHTS_PROMPT.to_string(),
            questions: DEFAULT_QUESTIONS_PROMPT.to_string(),
        }
    }
}

impl PromptSet {
    /// Load overrides from `dir`, keeping the default for every missing file.
    pub async fn from_dir(dir: &Path) -> Result<Self, DigestError> {
        let mut set = Self::default();
        for (file, slot) in [
            ("split.txt", &mut set.split),
            ("summary.txt", &mut set.summary),
            ("glossary.txt", &mut set.glossary),
            ("insights.txt", &mut set.insights),
            ("questions.txt", &mut set.questions),
        ] {
            let path = dir.join(file);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    debug!("Loaded prompt override {}", path.display());
                    *slot = text;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("No {} in {}, using built-in prompt", file, dir.display());
                }
                Err(source) => return Err(DigestError::PromptLoadFailed { path, source }),
            }
        }
        Ok(set)
    }
}

/// Substitute `{key}` for each `(key, value)` pair.
///
/// Values are inserted verbatim and are not rescanned, so a section that
/// happens to contain `{title}` is left intact.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + vars.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;
    'scan: while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        for (key, value) in vars {
            let needle_len = key.len() + 2;
            if tail.len() >= needle_len
                && tail[1..].starts_with(key)
                && tail.as_bytes()[needle_len - 1] == b'}'
            {
                out.push_str(value);
                rest = &tail[needle_len..];
                continue 'scan;
            }
        }
        out.push('{');
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_known_keys() {
        let out = render("T={title} C={content}", &[("title", "Intro"), ("content", "body")]);
        assert_eq!(out, "T=Intro C=body");
    }

    #[test]
    fn render_leaves_json_braces_alone() {
        let out = render(r#"[{"term": "..."}] {text}"#, &[("text", "paper")]);
        assert_eq!(out, r#"[{"term": "..."}] paper"#);
    }

    #[test]
    fn render_does_not_rescan_values() {
        let out = render("{content}/{title}", &[("title", "A"), ("content", "{title}")]);
        assert_eq!(out, "{title}/A");
    }

    #[test]
    fn default_prompts_have_their_placeholders() {
        let p = PromptSet::default();
        assert!(p.split.contains("{text}"));
        assert!(p.summary.contains("{title}") && p.summary.contains("{content}"));
        for t in [&p.glossary, &p.insights, &p.questions] {
            assert!(t.contains("{title}") && t.contains("{summary}") && t.contains("{content}"));
        }
    }

    #[tokio::test]
    async fn from_dir_overrides_only_present_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("summary.txt"), "SUMMARY {title}").unwrap();
        let set = PromptSet::from_dir(dir.path()).await.unwrap();
        assert_eq!(set.summary, "SUMMARY {title}");
        assert_eq!(set.split, DEFAULT_SPLIT_PROMPT);
    }
}
