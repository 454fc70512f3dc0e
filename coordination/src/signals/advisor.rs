//! Stage Advisor — signal set to autonomy stage
//!
//! Tiered, monotonic mapping. Adding a signal can never lower the
//! recommendation, except that the de-escalation short-circuit only applies
//! while no escalation-triggering signal is present.

use crate::escalation::context::{tail_succeeded, StepRecord};
use crate::escalation::state::EscalationStage;
use crate::signals::types::{EscalationSignal, SignalSet};

/// Consecutive successful steps needed before success-based de-escalation.
pub const DEESCALATION_SUCCESS_WINDOW: usize = 3;

/// Maps signals to stages and answers transition questions.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageAdvisor;

impl StageAdvisor {
    pub fn new() -> Self {
        Self
    }

    /// Recommend a stage for the given signals.
    ///
    /// When `current` is given and a failure signal is present the result is
    /// at least one stage above `current`.
    pub fn recommend_stage(
        &self,
        signals: &SignalSet,
        current: Option<EscalationStage>,
    ) -> EscalationStage {
        if has_deescalation_only(signals) {
            return EscalationStage::Direct;
        }

        let mut stage = signals
            .iter()
            .filter_map(|s| s.tier())
            .max()
            .unwrap_or(EscalationStage::Direct);

        if let Some(current) = current {
            if signals.iter().any(|s| s.is_failure()) {
                stage = stage.max(current.escalate());
            }
        }

        stage
    }

    /// Whether the recommendation sits above the current stage
    pub fn should_escalate(&self, signals: &SignalSet, current: EscalationStage) -> bool {
        self.recommend_stage(signals, Some(current)) > current
    }

    /// Whether the pipeline may drop one stage after a success.
    ///
    /// Requires a recommendation below `current` and either a pure
    /// de-escalation signal set or a run of successful steps with no
    /// complexity signal remaining.
    pub fn should_deescalate(
        &self,
        signals: &SignalSet,
        current: EscalationStage,
        recent_steps: &[StepRecord],
    ) -> bool {
        if current.is_min() {
            return false;
        }
        if self.recommend_stage(signals, Some(current)) >= current {
            return false;
        }

        if has_deescalation_only(signals) {
            return true;
        }

        tail_succeeded(recent_steps, DEESCALATION_SUCCESS_WINDOW)
            && !signals.iter().any(|s| s.is_complex())
    }
}

/// A de-escalation signal is present and nothing pulls upward.
fn has_deescalation_only(signals: &SignalSet) -> bool {
    signals.iter().any(EscalationSignal::is_deescalation)
        && !signals.iter().any(EscalationSignal::is_escalation_trigger)
}
