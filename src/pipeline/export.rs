//! The `export` stage: the AND-join that renders the report.

use crate::error::StageError;
use crate::graph::Stage;
use crate::pipeline::report::{build_report, write_atomic, ReportRenderer};
use crate::state::{PaperState, StateUpdate};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ExportStage {
    renderer: Arc<dyn ReportRenderer>,
    output_path: PathBuf,
}

impl ExportStage {
    pub fn new(renderer: Arc<dyn ReportRenderer>, output_path: PathBuf) -> Self {
        Self {
            renderer,
            output_path,
        }
    }
}

/// `<output>.md` beside the requested output, e.g. `report.pdf.md`.
fn markdown_fallback_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".md");
    PathBuf::from(name)
}

#[async_trait]
impl Stage<PaperState> for ExportStage {
    async fn run(&self, state: Arc<PaperState>) -> Result<StateUpdate, StageError> {
        let markdown = build_report(&state);
        info!(
            "Exporting report for '{}' to {}",
            state.paper_title,
            self.output_path.display()
        );

        match self.renderer.render(&markdown, &self.output_path).await {
            Ok(path) => Ok(StateUpdate::output_path(path)),
            Err(e @ StageError::Render(_)) => {
                let fallback = markdown_fallback_path(&self.output_path);
                warn!(
                    "Report rendering failed ({}); writing Markdown to {}",
                    e,
                    fallback.display()
                );
                write_atomic(&fallback, markdown.as_bytes()).await?;
                Ok(StateUpdate::output_path(fallback))
            }
            Err(e) => Err(e),
        }
    }

    /// The report file is the point of this stage; replaying the recorded
    /// path would leave the configured output unwritten.
    fn cacheable(&self) -> bool {
        false
    }
}
