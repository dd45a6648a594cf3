//! The shared state threaded through the paper-digest workflow.
//!
//! [`PaperState`] is the accumulating record: every field a stage produces is
//! an `Option` that stays `None` until the owning stage has run. Stages never
//! touch it directly; they return a [`StateUpdate`] holding only the fields
//! they own, and the executor merges it with overwrite-or-insert semantics.
//! A field that is `None` in the update is left alone, so no stage can erase
//! what an earlier stage wrote.

use crate::error::StageError;
use crate::graph::WorkflowState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One section of the paper as produced by the split stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: String,
}

/// A section together with its LLM summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub title: String,
    pub summary: String,
    pub content: String,
}

/// A glossary term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub term: String,
    #[serde(default)]
    pub definition: String,
}

/// Document-level metadata extracted from the PDF.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Shared state for one digest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperState {
    /// Local path of the source PDF.
    pub pdf_path: PathBuf,
    /// Title shown in the report header.
    pub paper_title: String,
    /// Path of the rendered report, set by the export stage.
    pub output_path: Option<PathBuf>,
    pub paper_text: Option<String>,
    pub metadata: Option<DocumentMetadata>,
    pub sections: Option<Vec<Section>>,
    pub summaries: Option<Vec<SectionSummary>>,
    pub glossary: Option<Vec<GlossaryEntry>>,
    pub insights: Option<Vec<String>>,
    pub questions: Option<Vec<String>>,
}

impl PaperState {
    /// Initial state for a run over `pdf_path`.
    pub fn new(pdf_path: impl Into<PathBuf>, paper_title: impl Into<String>) -> Self {
        Self {
            pdf_path: pdf_path.into(),
            paper_title: paper_title.into(),
            ..Default::default()
        }
    }

    pub fn require_text(&self) -> Result<&str, StageError> {
        self.paper_text
            .as_deref()
            .ok_or(StageError::MissingInput("paper_text"))
    }

    pub fn require_sections(&self) -> Result<&[Section], StageError> {
        self.sections
            .as_deref()
            .ok_or(StageError::MissingInput("sections"))
    }

    pub fn require_summaries(&self) -> Result<&[SectionSummary], StageError> {
        self.summaries
            .as_deref()
            .ok_or(StageError::MissingInput("summaries"))
    }
}

/// The fields one stage contributes. `None` means "not mine, leave it".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<Section>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summaries: Option<Vec<SectionSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glossary: Option<Vec<GlossaryEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl StateUpdate {
    pub fn document(text: String, metadata: DocumentMetadata) -> Self {
        Self {
            paper_text: Some(text),
            metadata: Some(metadata),
            ..Default::default()
        }
    }

    pub fn sections(sections: Vec<Section>) -> Self {
        Self {
            sections: Some(sections),
            ..Default::default()
        }
    }

    pub fn summaries(summaries: Vec<SectionSummary>) -> Self {
        Self {
            summaries: Some(summaries),
            ..Default::default()
        }
    }

    pub fn glossary(glossary: Vec<GlossaryEntry>) -> Self {
        Self {
            glossary: Some(glossary),
            ..Default::default()
        }
    }

    pub fn insights(insights: Vec<String>) -> Self {
        Self {
            insights: Some(insights),
            ..Default::default()
        }
    }

    pub fn questions(questions: Vec<String>) -> Self {
        Self {
            questions: Some(questions),
            ..Default::default()
        }
    }

    pub fn output_path(path: PathBuf) -> Self {
        Self {
            output_path: Some(path),
            ..Default::default()
        }
    }

    /// True when the update carries no fields at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl WorkflowState for PaperState {
    type Update = StateUpdate;

    fn merge(&mut self, update: StateUpdate) {
        fn put<T>(slot: &mut Option<T>, value: Option<T>) {
            if let Some(v) = value {
                *slot = Some(v);
            }
        }

        put(&mut self.paper_text, update.paper_text);
        put(&mut self.metadata, update.metadata);
        put(&mut self.sections, update.sections);
        put(&mut self.summaries, update.summaries);
        put(&mut self.glossary, update.glossary);
        put(&mut self.insights, update.insights);
        put(&mut self.questions, update.questions);
        put(&mut self.output_path, update.output_path);
    }
}
