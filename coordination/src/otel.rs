//! OpenTelemetry-Compatible Span Helpers
//!
//! Structured `tracing` span builders for the escalation pipeline. All
//! spans use dot-notation field names compatible with OpenTelemetry
//! semantic conventions.
//!
//! # Span Hierarchy
//!
//! ```text
//! escalation.execute            (root, one per execute_at_stage call)
//!   ├─ escalation.stage         (one per stage executor dispatch)
//!   ├─ escalation.transition    (±1 stage move)
//!   └─ escalation.doom_loop     (detected loop + chosen recovery)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::otel;
//!
//! let span = otel::stage_span("planned", 2);
//! let guard = span.enter();
//! // ... run the stage executor ...
//! otel::record_stage_result(&span, true, 1450, 812);
//! drop(guard);
//! ```

use crate::escalation::state::EscalationStage;
use serde::{Deserialize, Serialize};
use tracing::Span;

// ── Span Name Constants ──────────────────────────────────────────────

/// Root span for one pipeline run.
pub const SPAN_EXECUTE: &str = "escalation.execute";

/// One stage executor dispatch.
pub const SPAN_STAGE: &str = "escalation.stage";

/// Stage transition.
pub const SPAN_TRANSITION: &str = "escalation.transition";

/// Detected doom loop.
pub const SPAN_DOOM_LOOP: &str = "escalation.doom_loop";

// ── Field Name Constants ─────────────────────────────────────────────

pub const FIELD_RUN_ID: &str = "escalation.run_id";
pub const FIELD_STAGE: &str = "escalation.stage.name";
pub const FIELD_INITIAL_STAGE: &str = "escalation.stage.initial";
pub const FIELD_FINAL_STAGE: &str = "escalation.stage.final";
pub const FIELD_STEP: &str = "escalation.step";
pub const FIELD_SIGNALS: &str = "escalation.signals";
pub const FIELD_SUCCESS: &str = "escalation.success";
pub const FIELD_DURATION_MS: &str = "escalation.duration_ms";
pub const FIELD_TOKENS_USED: &str = "escalation.tokens_used";
pub const FIELD_FROM_STAGE: &str = "escalation.transition.from";
pub const FIELD_TO_STAGE: &str = "escalation.transition.to";
pub const FIELD_REASON: &str = "escalation.transition.reason";
pub const FIELD_LOOP_TYPE: &str = "escalation.doom_loop.type";
pub const FIELD_RECOVERY: &str = "escalation.doom_loop.recovery";
pub const FIELD_RECOVERY_ATTEMPT: &str = "escalation.doom_loop.attempt";

// ── Span Builders ────────────────────────────────────────────────────

/// Create a root span for one pipeline run.
///
/// Fields filled at creation: run id, initial stage, signals.
/// Fields filled later via [`record_execute_result`]: success, final stage, steps, duration.
pub fn execute_span(run_id: &str, initial_stage: EscalationStage, signals: &str) -> Span {
    tracing::info_span!(
        "escalation.execute",
        "escalation.run_id" = %run_id,
        "escalation.stage.initial" = %initial_stage,
        "escalation.signals" = %signals,
        "escalation.success" = tracing::field::Empty,
        "escalation.stage.final" = tracing::field::Empty,
        "escalation.step" = tracing::field::Empty,
        "escalation.duration_ms" = tracing::field::Empty,
    )
}

/// Record the final result on an execute span.
pub fn record_execute_result(
    span: &Span,
    success: bool,
    final_stage: EscalationStage,
    steps: u32,
    duration_ms: u64,
) {
    span.record("escalation.success", success);
    span.record("escalation.stage.final", tracing::field::display(final_stage));
    span.record("escalation.step", steps);
    span.record("escalation.duration_ms", duration_ms);
}

/// Create a span for one stage executor dispatch.
pub fn stage_span(stage: &str, step: u32) -> Span {
    tracing::info_span!(
        "escalation.stage",
        "escalation.stage.name" = %stage,
        "escalation.step" = step,
        "escalation.success" = tracing::field::Empty,
        "escalation.duration_ms" = tracing::field::Empty,
        "escalation.tokens_used" = tracing::field::Empty,
    )
}

/// Record the outcome of a stage executor.
pub fn record_stage_result(span: &Span, success: bool, duration_ms: u64, tokens_used: u64) {
    span.record("escalation.success", success);
    span.record("escalation.duration_ms", duration_ms);
    span.record("escalation.tokens_used", tokens_used);
}

/// Create a span for a stage transition.
///
/// All fields filled at creation since a transition is a point-in-time decision.
pub fn transition_span(from: EscalationStage, to: EscalationStage, reason: &str, step: u32) -> Span {
    tracing::info_span!(
        "escalation.transition",
        "escalation.transition.from" = %from,
        "escalation.transition.to" = %to,
        "escalation.transition.reason" = %reason,
        "escalation.step" = step,
    )
}

/// Create a span for a detected doom loop.
pub fn doom_loop_span(loop_type: &str, recovery: &str, attempt: u32, step: u32) -> Span {
    tracing::warn_span!(
        "escalation.doom_loop",
        "escalation.doom_loop.type" = %loop_type,
        "escalation.doom_loop.recovery" = %recovery,
        "escalation.doom_loop.attempt" = attempt,
        "escalation.step" = step,
    )
}

// ── Run Summary ──────────────────────────────────────────────────────

/// Aggregate of span activity across pipeline runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Pipeline runs started.
    pub runs: u32,
    /// Runs that ended successfully.
    pub successes: u32,
    /// Stage executor dispatches.
    pub stage_executions: u32,
    pub escalations: u32,
    pub deescalations: u32,
    /// Doom loops detected.
    pub doom_loops: u32,
    pub total_tokens: u64,
    pub total_duration_ms: u64,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished run.
    pub fn record_run(&mut self, success: bool, tokens: u64, duration_ms: u64) {
        self.runs += 1;
        if success {
            self.successes += 1;
        }
        self.total_tokens += tokens;
        self.total_duration_ms += duration_ms;
    }

    pub fn record_stage(&mut self) {
        self.stage_executions += 1;
    }

    /// Record a stage move in either direction.
    pub fn record_transition(&mut self, from: EscalationStage, to: EscalationStage) {
        if to > from {
            self.escalations += 1;
        } else if to < from {
            self.deescalations += 1;
        }
    }

    pub fn record_doom_loop(&mut self) {
        self.doom_loops += 1;
    }

    /// Fraction of runs that succeeded (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        self.successes as f64 / self.runs as f64
    }

    /// Mean run duration in milliseconds.
    pub fn avg_duration_ms(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        self.total_duration_ms as f64 / self.runs as f64
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "runs={}/{} stages={} escalations={} deescalations={} doom_loops={} tokens={}",
            self.successes,
            self.runs,
            self.stage_executions,
            self.escalations,
            self.deescalations,
            self.doom_loops,
            self.total_tokens,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// Initialize a test subscriber so spans are not disabled.
    fn init_test_subscriber() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .try_init();
        });
    }

    #[test]
    fn test_execute_span_creates_valid_span() {
        init_test_subscriber();
        let span = execute_span("run-1", EscalationStage::Planned, "edit_intent");
        assert!(!span.is_disabled());
        record_execute_result(&span, true, EscalationStage::Heuristic, 3, 4500);
    }

    #[test]
    fn test_stage_span_creates_valid_span() {
        init_test_subscriber();
        let span = stage_span("autonomous", 2);
        assert!(!span.is_disabled());
        record_stage_result(&span, false, 120, 900);
    }

    #[test]
    fn test_transition_and_doom_loop_spans() {
        init_test_subscriber();
        let span = transition_span(
            EscalationStage::Direct,
            EscalationStage::Heuristic,
            "stage failed",
            1,
        );
        assert!(!span.is_disabled());
        let span = doom_loop_span("repeated_failure", "retry_different", 0, 3);
        assert!(!span.is_disabled());
    }

    #[test]
    fn test_run_summary_recording() {
        let mut summary = RunSummary::new();
        summary.record_stage();
        summary.record_stage();
        summary.record_transition(EscalationStage::Direct, EscalationStage::Heuristic);
        summary.record_transition(EscalationStage::Planned, EscalationStage::Heuristic);
        summary.record_doom_loop();
        summary.record_run(true, 1000, 2000);
        summary.record_run(false, 500, 1000);

        assert_eq!(summary.runs, 2);
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.stage_executions, 2);
        assert_eq!(summary.escalations, 1);
        assert_eq!(summary.deescalations, 1);
        assert_eq!(summary.doom_loops, 1);
        assert_eq!(summary.total_tokens, 1500);
        assert!((summary.success_rate() - 0.5).abs() < f64::EPSILON);
        assert!((summary.avg_duration_ms() - 1500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_run_summary_display() {
        let mut summary = RunSummary::new();
        summary.record_run(true, 512, 10);
        let display = summary.to_string();
        assert!(display.contains("runs=1/1"));
        assert!(display.contains("tokens=512"));
    }

    #[test]
    fn test_empty_summary_rates() {
        let summary = RunSummary::new();
        assert_eq!(summary.success_rate(), 0.0);
        assert_eq!(summary.avg_duration_ms(), 0.0);
    }

    #[test]
    fn test_constants_are_dotted() {
        for name in [SPAN_EXECUTE, SPAN_STAGE, SPAN_TRANSITION, SPAN_DOOM_LOOP] {
            assert!(name.starts_with("escalation."));
        }
        for field in [
            FIELD_RUN_ID,
            FIELD_STAGE,
            FIELD_INITIAL_STAGE,
            FIELD_FINAL_STAGE,
            FIELD_SIGNALS,
            FIELD_LOOP_TYPE,
            FIELD_RECOVERY,
            FIELD_RECOVERY_ATTEMPT,
            FIELD_FROM_STAGE,
            FIELD_TO_STAGE,
            FIELD_REASON,
            FIELD_TOKENS_USED,
            FIELD_DURATION_MS,
            FIELD_SUCCESS,
            FIELD_STEP,
        ] {
            assert!(field.contains('.'));
        }
    }
}
