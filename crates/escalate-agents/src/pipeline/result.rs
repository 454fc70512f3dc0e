//! Result of one pipeline run.

use chrono::{DateTime, Utc};
use coordination::escalation::{EscalationStage, StageTransition};
use coordination::signals::{format_signals, SignalSet};
use serde::{Deserialize, Serialize};

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub steps: u32,
    pub tool_calls: u32,
    pub tokens_used: u64,
    pub elapsed_ms: u64,
    pub doom_loops: u32,
}

/// Output of a stage executor.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    pub response: String,
    pub success: bool,
    /// Failure reason when `success` is false
    pub error: Option<String>,
    pub tool_calls: u32,
    pub tokens_used: u64,
    pub files_modified: Vec<String>,
    /// Checkpoint saved before the stage ran
    pub checkpoint_id: Option<String>,
}

impl StageOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            response: reason.clone(),
            success: false,
            error: Some(reason),
            ..Default::default()
        }
    }

    /// Reason to report when this outcome ends a run unsuccessfully.
    pub fn failure_reason(&self) -> String {
        self.error.clone().unwrap_or_else(|| self.response.clone())
    }
}

/// Everything a host needs to report on a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub response: String,
    pub success: bool,
    pub initial_stage: EscalationStage,
    pub final_stage: EscalationStage,
    pub escalations: u32,
    pub deescalations: u32,
    pub signals: SignalSet,
    pub stats: ExecutionStats,
    pub checkpoint_id: Option<String>,
    pub files_modified: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stage_history: Vec<StageTransition>,
}

impl EscalationResult {
    pub fn new(run_id: impl Into<String>, initial_stage: EscalationStage, signals: SignalSet) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            response: String::new(),
            success: false,
            initial_stage,
            final_stage: initial_stage,
            escalations: 0,
            deescalations: 0,
            signals,
            stats: ExecutionStats::default(),
            checkpoint_id: None,
            files_modified: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            stage_history: Vec::new(),
        }
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} {}->{} steps={} esc={} deesc={} loops={} tokens={} errors={} warnings={} signals=[{}]",
            if self.success { "OK" } else { "FAILED" },
            self.initial_stage,
            self.final_stage,
            self.stats.steps,
            self.escalations,
            self.deescalations,
            self.stats.doom_loops,
            self.stats.tokens_used,
            self.errors.len(),
            self.warnings.len(),
            format_signals(&self.signals),
        )
    }
}
