//! Report composition and rendering.
//!
//! [`build_report`] turns the final state into Markdown with four fixed
//! sections, always present and always in this order:
//!
//! 1. Chapter Summaries
//! 2. Glossary (term / definition table)
//! 3. Key Insights
//! 4. Review Questions
//!
//! Empty sections carry a visible placeholder instead of being dropped.
//! A [`ReportRenderer`] then writes the Markdown to disk, either as-is
//! ([`MarkdownRenderer`]) or laid out as a PDF ([`PdfReportRenderer`]).

use crate::error::StageError;
use crate::pipeline::pdf;
use crate::state::{GlossaryEntry, PaperState, SectionSummary};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const SUMMARIES_HEADER: &str = "## 1. Chapter Summaries";
pub const GLOSSARY_HEADER: &str = "## 2. Glossary";
pub const INSIGHTS_HEADER: &str = "## 3. Key Insights";
pub const QUESTIONS_HEADER: &str = "## 4. Review Questions";

/// Build the report Markdown from whatever the state holds.
pub fn build_report(state: &PaperState) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Reading Report: {}\n", single_line(&state.paper_title));

    md.push_str(SUMMARIES_HEADER);
    md.push_str("\n\n");
    write_summaries(&mut md, state.summaries.as_deref().unwrap_or_default());

    md.push_str(GLOSSARY_HEADER);
    md.push_str("\n\n");
    write_glossary(&mut md, state.glossary.as_deref().unwrap_or_default());

    md.push_str(INSIGHTS_HEADER);
    md.push_str("\n\n");
    write_bullets(
        &mut md,
        state.insights.as_deref().unwrap_or_default(),
        "_No insights extracted._",
    );

    md.push_str(QUESTIONS_HEADER);
    md.push_str("\n\n");
    write_bullets(
        &mut md,
        state.questions.as_deref().unwrap_or_default(),
        "_No questions generated._",
    );

    md
}

fn write_summaries(md: &mut String, summaries: &[SectionSummary]) {
    if summaries.is_empty() {
        md.push_str("_No sections were summarized._\n\n");
        return;
    }
    for s in summaries {
        let _ = writeln!(md, "### {}\n\n{}\n", single_line(&s.title), s.summary.trim());
    }
}

fn write_glossary(md: &mut String, glossary: &[GlossaryEntry]) {
    md.push_str("| Term | Definition |\n|------|------------|\n");
    if glossary.is_empty() {
        md.push_str("| — | — |\n");
    }
    for e in glossary {
        let _ = writeln!(md, "| {} | {} |", table_cell(&e.term), table_cell(&e.definition));
    }
    md.push('\n');
}

fn write_bullets(md: &mut String, items: &[String], empty: &str) {
    if items.is_empty() {
        let _ = writeln!(md, "- {}", empty);
    }
    for item in items {
        let _ = writeln!(md, "- {}", single_line(item));
    }
    md.push('\n');
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn table_cell(s: &str) -> String {
    single_line(s).replace('|', "\\|")
}

/// Writes the report Markdown to `path` in some format.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Returns the path actually written.
    async fn render(&self, markdown: &str, path: &Path) -> Result<PathBuf, StageError>;
}

/// Pick a renderer from the output extension: `.md` / `.markdown` write
/// Markdown, everything else a PDF.
pub fn renderer_for(path: &Path) -> Arc<dyn ReportRenderer> {
    let is_markdown = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
        .unwrap_or(false);
    if is_markdown {
        Arc::new(MarkdownRenderer)
    } else {
        Arc::new(PdfReportRenderer::default())
    }
}

/// Writes the Markdown verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

#[async_trait]
impl ReportRenderer for MarkdownRenderer {
    async fn render(&self, markdown: &str, path: &Path) -> Result<PathBuf, StageError> {
        write_atomic(path, markdown.as_bytes()).await?;
        info!("Wrote Markdown report to {}", path.display());
        Ok(path.to_path_buf())
    }
}

/// Atomic write: parent dirs, temp file, then rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StageError> {
    let io_err = |source| StageError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    tokio::fs::write(&tmp_path, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err)
}

/// Lays the Markdown out as plain text on A4 pages with pdfium's built-in
/// Helvetica fonts. Headings are set in bold at larger sizes; no other
/// Markdown is interpreted.
#[derive(Debug, Clone, Copy)]
pub struct PdfReportRenderer {
    pub body_size: f32,
    pub margin: f32,
}

impl Default for PdfReportRenderer {
    fn default() -> Self {
        Self {
            body_size: 10.5,
            margin: 56.0,
        }
    }
}

#[async_trait]
impl ReportRenderer for PdfReportRenderer {
    async fn render(&self, markdown: &str, path: &Path) -> Result<PathBuf, StageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StageError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        let lines = layout_lines(markdown);
        let out = path.to_path_buf();
        let renderer = *self;
        let pages = tokio::task::spawn_blocking(move || renderer.write_pdf(&lines, &out))
            .await
            .map_err(|e| StageError::Render(format!("PDF render task panicked: {}", e)))??;
        info!("Wrote {}-page PDF report to {}", pages, path.display());
        Ok(path.to_path_buf())
    }
}

/// One line of laid-out text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Line {
    pub text: String,
    pub bold: bool,
    /// Font size as a multiple of the body size.
    pub scale: f32,
}

/// Map Markdown lines onto styled text lines.
pub(crate) fn layout_lines(markdown: &str) -> Vec<Line> {
    markdown
        .lines()
        .filter(|l| !is_table_rule(l))
        .map(|l| {
            let (text, bold, scale) = if let Some(h) = l.strip_prefix("# ") {
                (h, true, 1.7)
            } else if let Some(h) = l.strip_prefix("## ") {
                (h, true, 1.35)
            } else if let Some(h) = l.strip_prefix("### ") {
                (h, true, 1.15)
            } else if let Some(item) = l.strip_prefix("- ") {
                let item = item
                    .strip_prefix('_')
                    .and_then(|i| i.strip_suffix('_'))
                    .unwrap_or(item);
                return Line {
                    text: format!("•  {}", item),
                    bold: false,
                    scale: 1.0,
                };
            } else {
                (l, false, 1.0)
            };
            Line {
                text: text.replace("\\|", "|"),
                bold,
                scale,
            }
        })
        .collect()
}

fn is_table_rule(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Greedy word wrap to at most `max_chars` characters per line.
pub(crate) fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(8);
    let mut out = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = current.chars().count() + usize::from(!current.is_empty()) + word.chars().count();
        if needed > max_chars && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || out.is_empty() {
        out.push(current);
    }
    out
}

impl PdfReportRenderer {
    const PAGE_WIDTH: f32 = 595.0;
    const PAGE_HEIGHT: f32 = 842.0;

    fn write_pdf(&self, lines: &[Line], path: &Path) -> Result<usize, StageError> {
        let pdfium = pdf::bind_pdfium().map_err(|e| StageError::Render(e.to_string()))?;
        let render_err = |e: PdfiumError| StageError::Render(format!("{:?}", e));

        let mut document = pdfium.create_new_pdf().map_err(render_err)?;
        let regular = document.fonts_mut().helvetica();
        let bold = document.fonts_mut().helvetica_bold();

        let usable_width = Self::PAGE_WIDTH - 2.0 * self.margin;
        let mut page_count = 0usize;
        let mut page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::a4())
            .map_err(render_err)?;
        page_count += 1;
        let mut y = Self::PAGE_HEIGHT - self.margin;

        for line in lines {
            let size = self.body_size * line.scale;
            let leading = size * 1.4;
            // Helvetica averages about half an em per character.
            let max_chars = (usable_width / (size * 0.5)) as usize;
            let font = if line.bold { bold } else { regular };

            if line.text.trim().is_empty() {
                y -= leading * 0.5;
                continue;
            }
            if line.scale > 1.0 {
                y -= leading * 0.4;
            }
            for chunk in wrap(&line.text, max_chars) {
                if y - leading < self.margin {
                    page = document
                        .pages_mut()
                        .create_page_at_end(PdfPagePaperSize::a4())
                        .map_err(render_err)?;
                    page_count += 1;
                    y = Self::PAGE_HEIGHT - self.margin;
                }
                y -= leading;
                page.objects_mut()
                    .create_text_object(
                        PdfPoints::new(self.margin),
                        PdfPoints::new(y),
                        &chunk,
                        font,
                        PdfPoints::new(size),
                    )
                    .map_err(render_err)?;
            }
        }

        document.save_to_file(path).map_err(render_err)?;
        debug!("PDF report: {} lines on {} pages", lines.len(), page_count);
        Ok(page_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_state() -> PaperState {
        let mut s = PaperState::new("attention.pdf", "Attention Is All You Need");
        s.summaries = Some(vec![
            SectionSummary {
                title: "Introduction".into(),
                summary: "Recurrent models are slow.".into(),
                content: "...".into(),
            },
            SectionSummary {
                title: "Model Architecture".into(),
                summary: "Stacked self-attention.".into(),
                content: "...".into(),
            },
        ]);
        s.glossary = Some(vec![GlossaryEntry {
            term: "Self-attention".into(),
            definition: "Relates positions of a single sequence | itself.".into(),
        }]);
        s.insights = Some(vec!["Attention alone suffices".into()]);
        s.questions = Some(vec!["Why scale by sqrt(d_k)?".into()]);
        s
    }

    #[test]
    fn headers_appear_in_fixed_order() {
        let md = build_report(&full_state());
        let positions: Vec<usize> = [SUMMARIES_HEADER, GLOSSARY_HEADER, INSIGHTS_HEADER, QUESTIONS_HEADER]
            .iter()
            .map(|h| md.find(h).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(md.starts_with("# Reading Report: Attention Is All You Need"));
        assert!(md.contains("### Introduction\n\nRecurrent models are slow."));
        assert!(md.contains("| Self-attention | Relates positions of a single sequence \\| itself. |"));
        assert!(md.contains("- Why scale by sqrt(d_k)?"));
    }

    #[test]
    fn empty_sections_show_placeholders() {
        let md = build_report(&PaperState::new("x.pdf", "x"));
        assert!(md.contains(GLOSSARY_HEADER));
        assert!(md.contains("| — | — |"));
        assert!(md.contains("- _No insights extracted._"));
        assert!(md.contains("- _No questions generated._"));
    }

    #[tokio::test]
    async fn md_extension_writes_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("report.MD");
        let written = renderer_for(&target).render("# hi\n", &target).await.unwrap();
        assert_eq!(std::fs::read_to_string(written).unwrap(), "# hi\n");
    }

    #[tokio::test]
    async fn markdown_renderer_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/deeper/report.md");
        MarkdownRenderer.render("body", &target).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "body");
        assert!(!dir.path().join("nested/deeper/report.md.tmp").exists());
    }

    #[test]
    fn layout_styles_headings_and_skips_table_rules() {
        let lines = layout_lines("# Title\n## 2. Glossary\n| Term | Definition |\n|------|------------|\n- item\nplain");
        assert_eq!(lines.len(), 5);
        assert!(lines[0].bold && lines[0].scale > lines[1].scale);
        assert_eq!(lines[3].text, "•  item");
        assert!(!lines[4].bold);
    }

    #[test]
    fn wrap_breaks_on_words() {
        let out = wrap("the quick brown fox jumps over the lazy dog", 10);
        assert!(out.iter().all(|l| l.chars().count() <= 10));
        assert_eq!(out.join(" "), "the quick brown fox jumps over the lazy dog");
        assert_eq!(wrap("", 10), vec![String::new()]);
    }
}
