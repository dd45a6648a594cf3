//! The paper digest pipeline: stage bodies and the graph wiring them.
//!
//! ```text
//! load ─▶ split ─▶ summarize ─┬─▶ glossary  ─┐
//!                             ├─▶ insights  ─┼─▶ export ─▶ END
//!                             └─▶ questions ─┘
//! ```
//!
//! `export` is an AND-join over the three extraction stages.

pub mod export;
pub mod extract;
pub mod input;
pub mod json;
pub mod llm;
pub mod load;
pub mod pdf;
pub mod report;
pub mod split;
pub mod summarize;

use crate::config::DigestConfig;
use crate::error::GraphError;
use crate::graph::{CompiledGraph, WorkflowGraph, END};
use crate::prompts::PromptSet;
use crate::state::PaperState;
use futures::future::join_all;
use llm::CompletionClient;
use load::TextExtractor;
use report::ReportRenderer;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Stage names, as used for cache files, policy overrides and reports.
pub mod stages {
    pub const LOAD: &str = "load";
    pub const SPLIT: &str = "split";
    pub const SUMMARIZE: &str = "summarize";
    pub const GLOSSARY: &str = "glossary";
    pub const INSIGHTS: &str = "insights";
    pub const QUESTIONS: &str = "questions";
    pub const EXPORT: &str = "export";

    /// Every stage, in topological order.
    pub const ALL: [&str; 7] = [LOAD, SPLIT, SUMMARIZE, GLOSSARY, INSIGHTS, QUESTIONS, EXPORT];
}

/// External services the stages call.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn CompletionClient>,
    pub extractor: Arc<dyn TextExtractor>,
    /// Report renderer. None picks one from the output path's extension.
    pub renderer: Option<Arc<dyn ReportRenderer>>,
}

impl Collaborators {
    pub fn new(llm: Arc<dyn CompletionClient>, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            llm,
            extractor,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ReportRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }
}

/// Run `f` over `items` with at most `limit` futures in flight, returning
/// results in input order. Excess items wait for a permit.
pub async fn map_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let semaphore = Semaphore::new(limit.max(1));
    let semaphore = &semaphore;
    join_all(items.into_iter().map(|item| {
        let fut = f(item);
        async move {
            // The semaphore is never closed, so acquire cannot fail.
            let _permit = semaphore.acquire().await;
            fut.await
        }
    }))
    .await
}

/// Build and compile the digest workflow.
pub fn build_workflow(
    config: &DigestConfig,
    collaborators: &Collaborators,
    prompts: &PromptSet,
) -> Result<CompiledGraph<PaperState>, GraphError> {
    use stages::*;

    let llm = &collaborators.llm;
    let renderer = collaborators
        .renderer
        .clone()
        .unwrap_or_else(|| report::renderer_for(&config.output_path));

    let mut graph = WorkflowGraph::new();
    graph
        .add_stage_with_policy(
            LOAD,
            load::LoadStage::new(Arc::clone(&collaborators.extractor), config.password.clone()),
            config.policy_for(LOAD),
        )?
        .add_stage_with_policy(
            SPLIT,
            split::SplitStage::new(Arc::clone(llm), prompts.split.clone(), config),
            config.policy_for(SPLIT),
        )?
        .add_stage_with_policy(
            SUMMARIZE,
            summarize::SummarizeStage::new(Arc::clone(llm), prompts.summary.clone(), config.concurrency),
            config.policy_for(SUMMARIZE),
        )?
        .add_stage_with_policy(
            GLOSSARY,
            extract::GlossaryStage::new(Arc::clone(llm), prompts.glossary.clone(), config.concurrency),
            config.policy_for(GLOSSARY),
        )?
        .add_stage_with_policy(
            INSIGHTS,
            extract::ListStage::insights(Arc::clone(llm), prompts.insights.clone(), config.concurrency),
            config.policy_for(INSIGHTS),
        )?
        .add_stage_with_policy(
            QUESTIONS,
            extract::ListStage::questions(Arc::clone(llm), prompts.questions.clone(), config.concurrency),
            config.policy_for(QUESTIONS),
        )?
        .add_stage_with_policy(
            EXPORT,
            export::ExportStage::new(renderer, config.output_path.clone()),
            config.policy_for(EXPORT),
        )?;

    graph
        .set_entry(LOAD)?
        .add_edge(LOAD, SPLIT)?
        .add_edge(SPLIT, SUMMARIZE)?
        .add_edge(SUMMARIZE, GLOSSARY)?
        .add_edge(SUMMARIZE, INSIGHTS)?
        .add_edge(SUMMARIZE, QUESTIONS)?
        .add_edge(GLOSSARY, EXPORT)?
        .add_edge(INSIGHTS, EXPORT)?
        .add_edge(QUESTIONS, EXPORT)?
        .add_edge(EXPORT, END)?;

    graph.compile()
}
