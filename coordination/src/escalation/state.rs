//! Escalation State — autonomy stages and transition records

use serde::{Deserialize, Serialize};

/// Autonomy stages in the escalation ladder, ordered from least to most autonomy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStage {
    /// Plain chat, no tool filtering
    #[default]
    Direct = 0,
    /// Signal-selected subset of tools
    Heuristic = 1,
    /// Plan-then-execute prompt
    Planned = 2,
    /// Unrestricted tools, checkpoint first, verify work
    Autonomous = 3,
}

impl EscalationStage {
    /// All stages in ascending order
    pub const ALL: [EscalationStage; 4] = [
        Self::Direct,
        Self::Heuristic,
        Self::Planned,
        Self::Autonomous,
    ];

    /// Numeric level (0..=3)
    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// Stage for a numeric level, clamped into range
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Direct,
            1 => Self::Heuristic,
            2 => Self::Planned,
            _ => Self::Autonomous,
        }
    }

    /// Next stage up (saturates at Autonomous)
    pub fn escalate(&self) -> Self {
        Self::from_level(self.level().saturating_add(1))
    }

    /// Next stage down (saturates at Direct)
    pub fn deescalate(&self) -> Self {
        Self::from_level(self.level().saturating_sub(1))
    }

    /// Whether no higher stage exists
    pub fn is_max(&self) -> bool {
        *self == Self::Autonomous
    }

    /// Whether no lower stage exists
    pub fn is_min(&self) -> bool {
        *self == Self::Direct
    }
}

impl std::fmt::Display for EscalationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Planned => write!(f, "planned"),
            Self::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl std::str::FromStr for EscalationStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "heuristic" => Ok(Self::Heuristic),
            "planned" => Ok(Self::Planned),
            "autonomous" => Ok(Self::Autonomous),
            other => Err(format!("unknown escalation stage: {other}")),
        }
    }
}

/// Why the pipeline moved between stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// The stage executor reported failure
    StageFailed,
    /// Signals no longer justify the current stage after a success
    SignalsAllowDeescalation,
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StageFailed => write!(f, "stage failed"),
            Self::SignalsAllowDeescalation => write!(f, "signals allow de-escalation"),
        }
    }
}

/// Record of a single one-step stage move
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    /// Stage before the move
    pub from: EscalationStage,
    /// Stage after the move
    pub to: EscalationStage,
    /// Why the move happened
    pub reason: TransitionReason,
    /// Step count at which the move happened (1-indexed)
    pub at_step: u32,
}

impl StageTransition {
    /// Whether this moved to a higher stage
    pub fn is_escalation(&self) -> bool {
        self.to > self.from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering() {
        assert!(EscalationStage::Direct < EscalationStage::Heuristic);
        assert!(EscalationStage::Heuristic < EscalationStage::Planned);
        assert!(EscalationStage::Planned < EscalationStage::Autonomous);
        assert_eq!(
            EscalationStage::ALL.iter().max(),
            Some(&EscalationStage::Autonomous)
        );
    }

    #[test]
    fn test_escalate_clamps() {
        assert_eq!(
            EscalationStage::Direct.escalate(),
            EscalationStage::Heuristic
        );
        assert_eq!(
            EscalationStage::Autonomous.escalate(),
            EscalationStage::Autonomous
        );
    }

    #[test]
    fn test_deescalate_clamps() {
        assert_eq!(
            EscalationStage::Planned.deescalate(),
            EscalationStage::Heuristic
        );
        assert_eq!(
            EscalationStage::Direct.deescalate(),
            EscalationStage::Direct
        );
    }

    #[test]
    fn test_moves_are_single_step() {
        for stage in EscalationStage::ALL {
            let up = stage.escalate().level() as i16 - stage.level() as i16;
            let down = stage.level() as i16 - stage.deescalate().level() as i16;
            assert!(up == 0 || up == 1);
            assert!(down == 0 || down == 1);
        }
    }

    #[test]
    fn test_display_and_parse() {
        for stage in EscalationStage::ALL {
            let parsed: EscalationStage = stage.to_string().parse().unwrap();
            assert_eq!(parsed, stage);
        }
        assert!("turbo".parse::<EscalationStage>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&EscalationStage::Autonomous).unwrap();
        assert_eq!(json, "\"autonomous\"");
    }

    #[test]
    fn test_transition_direction() {
        let t = StageTransition {
            from: EscalationStage::Direct,
            to: EscalationStage::Heuristic,
            reason: TransitionReason::StageFailed,
            at_step: 1,
        };
        assert!(t.is_escalation());
        assert_eq!(t.reason.to_string(), "stage failed");
    }
}
