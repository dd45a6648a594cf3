//! The `load` stage: PDF file → full text + metadata.

use crate::error::StageError;
use crate::graph::Stage;
use crate::pipeline::pdf;
use crate::state::{DocumentMetadata, PaperState, StateUpdate};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Plain text and metadata of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Extracts text from a document on disk.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<ExtractedDocument, StageError>;
}

/// [`TextExtractor`] backed by pdfium's text layer. Pages are joined with
/// `"\n"` in page order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumExtractor;

#[async_trait]
impl TextExtractor for PdfiumExtractor {
    async fn extract(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<ExtractedDocument, StageError> {
        let path_buf = path.to_path_buf();
        let password = password.map(str::to_string);
        tokio::task::spawn_blocking(move || extract_blocking(&path_buf, password.as_deref()))
            .await
            .map_err(|e| StageError::Other(format!("Extraction task panicked: {}", e)))?
    }
}

fn extract_blocking(path: &Path, password: Option<&str>) -> Result<ExtractedDocument, StageError> {
    let pdfium = pdf::bind_pdfium()?;
    let document = pdf::open_document(&pdfium, path, password)?;
    let metadata = pdf::read_metadata(&document);
    info!("PDF loaded: {} pages", metadata.page_count);

    let mut pages_text = Vec::with_capacity(metadata.page_count);
    for (idx, page) in document.pages().iter().enumerate() {
        match page.text() {
            Ok(text) => {
                let text = text.all();
                debug!("Page {}: {} chars", idx + 1, text.len());
                pages_text.push(text);
            }
            Err(e) => {
                warn!("Page {}: no text layer ({:?}), skipping", idx + 1, e);
                pages_text.push(String::new());
            }
        }
    }

    Ok(ExtractedDocument {
        text: pages_text.join("\n"),
        metadata,
    })
}

/// Reads `pdf_path`, writes `paper_text` and `metadata`.
pub struct LoadStage {
    extractor: Arc<dyn TextExtractor>,
    password: Option<String>,
}

impl LoadStage {
    pub fn new(extractor: Arc<dyn TextExtractor>, password: Option<String>) -> Self {
        Self {
            extractor,
            password,
        }
    }
}

#[async_trait]
impl Stage<PaperState> for LoadStage {
    async fn run(&self, state: Arc<PaperState>) -> Result<StateUpdate, StageError> {
        let doc = self
            .extractor
            .extract(&state.pdf_path, self.password.as_deref())
            .await?;
        if doc.text.trim().is_empty() {
            return Err(StageError::Extraction {
                path: PathBuf::from(&state.pdf_path),
                detail: "no extractable text (scanned document?)".to_string(),
            });
        }
        info!(
            "Extracted {} chars from {} pages",
            doc.text.len(),
            doc.metadata.page_count
        );
        Ok(StateUpdate::document(doc.text, doc.metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(&'static str);

    #[async_trait]
    impl TextExtractor for Canned {
        async fn extract(
            &self,
            _path: &Path,
            _password: Option<&str>,
        ) -> Result<ExtractedDocument, StageError> {
            Ok(ExtractedDocument {
                text: self.0.to_string(),
                metadata: DocumentMetadata {
                    page_count: 1,
                    ..Default::default()
                },
            })
        }
    }

    #[tokio::test]
    async fn load_writes_text_and_metadata() {
        let stage = LoadStage::new(Arc::new(Canned("Abstract\nWe study...")), None);
        let update = stage
            .run(Arc::new(PaperState::new("p.pdf", "p")))
            .await
            .unwrap();
        assert_eq!(update.paper_text.as_deref(), Some("Abstract\nWe study..."));
        assert_eq!(update.metadata.unwrap().page_count, 1);
        assert!(update.sections.is_none());
    }

    #[tokio::test]
    async fn blank_text_is_an_extraction_error() {
        let stage = LoadStage::new(Arc::new(Canned(" \n ")), None);
        let err = stage
            .run(Arc::new(PaperState::new("scan.pdf", "scan")))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Extraction { .. }));
    }
}
