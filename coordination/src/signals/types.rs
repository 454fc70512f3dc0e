//! Signal vocabulary shared by the analyzer and the stage advisor

use crate::escalation::state::EscalationStage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Symbolic tag describing a detected prompt or context property
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationSignal {
    // Complexity
    LongPrompt,
    ComplexKeywords,
    MultiStepIntent,
    // Context
    RepoContext,
    FileReferences,
    CodeBlocks,
    // Task intent
    EditIntent,
    TestIntent,
    BuildIntent,
    RefactorIntent,
    // Failure / de-escalation
    ToolFailure,
    AmbiguousResult,
    IncompleteTask,
    SimpleQuestion,
    Clarification,
    Acknowledgment,
}

/// Group a signal belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalGroup {
    Complexity,
    Context,
    Intent,
    Outcome,
}

/// Set of detected signals, kept ordered for stable logging and serialization
pub type SignalSet = BTreeSet<EscalationSignal>;

impl EscalationSignal {
    /// Every signal, in declaration order
    pub const ALL: [EscalationSignal; 16] = [
        Self::LongPrompt,
        Self::ComplexKeywords,
        Self::MultiStepIntent,
        Self::RepoContext,
        Self::FileReferences,
        Self::CodeBlocks,
        Self::EditIntent,
        Self::TestIntent,
        Self::BuildIntent,
        Self::RefactorIntent,
        Self::ToolFailure,
        Self::AmbiguousResult,
        Self::IncompleteTask,
        Self::SimpleQuestion,
        Self::Clarification,
        Self::Acknowledgment,
    ];

    pub fn group(&self) -> SignalGroup {
        match self {
            Self::LongPrompt | Self::ComplexKeywords | Self::MultiStepIntent => {
                SignalGroup::Complexity
            }
            Self::RepoContext | Self::FileReferences | Self::CodeBlocks => SignalGroup::Context,
            Self::EditIntent | Self::TestIntent | Self::BuildIntent | Self::RefactorIntent => {
                SignalGroup::Intent
            }
            Self::ToolFailure
            | Self::AmbiguousResult
            | Self::IncompleteTask
            | Self::SimpleQuestion
            | Self::Clarification
            | Self::Acknowledgment => SignalGroup::Outcome,
        }
    }

    /// Minimum stage this signal asks for, if it belongs to a content tier.
    ///
    /// Tiers are disjoint: heuristic < planned < autonomous.
    pub fn tier(&self) -> Option<EscalationStage> {
        match self {
            Self::FileReferences
            | Self::CodeBlocks
            | Self::RepoContext
            | Self::TestIntent
            | Self::BuildIntent => Some(EscalationStage::Heuristic),
            Self::EditIntent | Self::RefactorIntent | Self::ComplexKeywords | Self::LongPrompt => {
                Some(EscalationStage::Planned)
            }
            Self::MultiStepIntent => Some(EscalationStage::Autonomous),
            _ => None,
        }
    }

    /// Signals reporting a failed or unfinished previous attempt
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ToolFailure | Self::AmbiguousResult | Self::IncompleteTask
        )
    }

    /// Signals that pull toward the Direct stage
    pub fn is_deescalation(&self) -> bool {
        matches!(
            self,
            Self::SimpleQuestion | Self::Clarification | Self::Acknowledgment
        )
    }

    /// Any signal that triggers more than Direct: a tiered signal or a failure signal
    pub fn is_escalation_trigger(&self) -> bool {
        self.tier().is_some() || self.is_failure()
    }

    /// Signals that keep a task "complex" and block success-based de-escalation
    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            Self::LongPrompt | Self::ComplexKeywords | Self::MultiStepIntent
        )
    }
}

impl std::fmt::Display for EscalationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LongPrompt => "long_prompt",
            Self::ComplexKeywords => "complex_keywords",
            Self::MultiStepIntent => "multi_step_intent",
            Self::RepoContext => "repo_context",
            Self::FileReferences => "file_references",
            Self::CodeBlocks => "code_blocks",
            Self::EditIntent => "edit_intent",
            Self::TestIntent => "test_intent",
            Self::BuildIntent => "build_intent",
            Self::RefactorIntent => "refactor_intent",
            Self::ToolFailure => "tool_failure",
            Self::AmbiguousResult => "ambiguous_result",
            Self::IncompleteTask => "incomplete_task",
            Self::SimpleQuestion => "simple_question",
            Self::Clarification => "clarification",
            Self::Acknowledgment => "acknowledgment",
        };
        f.write_str(s)
    }
}

/// Render a signal set as a comma-separated list for logs
pub fn format_signals(signals: &SignalSet) -> String {
    signals
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
