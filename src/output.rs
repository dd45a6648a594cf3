//! Result types returned by the digest entry points.

use crate::state::PaperState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use crate::graph::{RunReport, StageRecord, StageStatus};

/// Token counts accumulated over every LLM call of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub calls: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestOutput {
    /// Final accumulated state.
    pub state: PaperState,
    /// Where the report was written. None only when export degraded.
    pub report_path: Option<PathBuf>,
    /// Per-stage outcome in merge order.
    pub report: RunReport,
    /// None when the completion client does not track usage.
    pub usage: Option<TokenUsage>,
}

impl DigestOutput {
    /// True when at least one stage fell back to its degraded output.
    pub fn is_degraded(&self) -> bool {
        self.report.degraded().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_tokens_sums_both_directions() {
        let usage = TokenUsage {
            calls: 2,
            input_tokens: 120,
            output_tokens: 30,
        };
        assert_eq!(usage.total_tokens(), 150);
    }

    #[test]
    fn degraded_flag_follows_report() {
        let mut output = DigestOutput {
            state: PaperState::new("paper.pdf", "paper"),
            report_path: None,
            report: RunReport::default(),
            usage: None,
        };
        assert!(!output.is_degraded());
        output.report.stages.push(StageRecord {
            stage: "glossary".into(),
            status: StageStatus::Degraded {
                error: "timeout".into(),
            },
            duration_ms: 5,
        });
        assert!(output.is_degraded());
    }
}
