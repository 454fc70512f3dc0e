//! Stage Context — per-run mutable record threaded through one pipeline invocation

use crate::escalation::state::EscalationStage;
use crate::signals::types::SignalSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

/// One executed step in the run's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Action label (e.g. `stage:planned`)
    pub action: String,
    /// Response text or failure message
    pub result: String,
    /// Whether the step succeeded
    pub success: bool,
    /// Stage the step executed at
    pub stage: EscalationStage,
}

/// Mutable state of one `execute_at_stage` call.
///
/// Created at invocation start, mutated by the loop, and retained by the
/// pipeline only until the next run replaces it.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Current stage
    pub stage: EscalationStage,
    /// Original prompt
    pub prompt: String,
    /// Signals detected for the prompt
    pub signals: SignalSet,
    /// Ordered step log
    pub steps: Vec<StepRecord>,
    /// Tool calls reported by the agent
    pub tool_calls: u32,
    /// Tokens used (reported or estimated)
    pub tokens_used: u64,
    /// Checkpoints saved during the run
    pub checkpoint_ids: Vec<String>,
    /// Files the agent reported modifying
    pub files_modified: BTreeSet<String>,
    started: Instant,
}

impl StageContext {
    /// Create a new context starting now
    pub fn new(prompt: impl Into<String>, stage: EscalationStage, signals: SignalSet) -> Self {
        Self {
            stage,
            prompt: prompt.into(),
            signals,
            steps: Vec::new(),
            tool_calls: 0,
            tokens_used: 0,
            checkpoint_ids: Vec::new(),
            files_modified: BTreeSet::new(),
            started: Instant::now(),
        }
    }

    /// Append a step to the log
    pub fn record_step(
        &mut self,
        action: impl Into<String>,
        result: impl Into<String>,
        success: bool,
    ) {
        self.steps.push(StepRecord {
            action: action.into(),
            result: result.into(),
            success,
            stage: self.stage,
        });
    }

    /// Number of steps executed so far
    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Time since the context was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The most recent `n` steps, oldest first
    pub fn recent_steps(&self, n: usize) -> &[StepRecord] {
        let start = self.steps.len().saturating_sub(n);
        &self.steps[start..]
    }

    /// Most recent checkpoint id
    pub fn latest_checkpoint(&self) -> Option<&str> {
        self.checkpoint_ids.last().map(String::as_str)
    }

    /// Summary for logging
    pub fn summary(&self) -> String {
        format!(
            "stage={} steps={} tool_calls={} tokens={} files={} elapsed_ms={}",
            self.stage,
            self.steps.len(),
            self.tool_calls,
            self.tokens_used,
            self.files_modified.len(),
            self.elapsed().as_millis(),
        )
    }
}

/// Whether `steps` holds at least `n` entries and the last `n` all succeeded
pub fn tail_succeeded(steps: &[StepRecord], n: usize) -> bool {
    steps.len() >= n && steps[steps.len() - n..].iter().all(|s| s.success)
}
