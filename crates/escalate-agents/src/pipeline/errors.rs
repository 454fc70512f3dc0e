//! Pipeline error taxonomy.
//!
//! None of these escape `execute_at_stage`; they are rendered into the
//! result's `errors` / `warnings` lists.

use coordination::doom_loop::LoopType;
use coordination::error::ConfigError;
use coordination::escalation::EscalationStage;
use thiserror::Error;

use crate::agent::AgentError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The agent reported an error (after retries).
    #[error("{stage} stage: {source}")]
    Agent {
        stage: EscalationStage,
        #[source]
        source: AgentError,
    },

    /// The agent replied with nothing.
    #[error("{0} stage: agent returned an empty response")]
    EmptyResponse(EscalationStage),

    /// A panic was caught inside the pipeline or one of its collaborators.
    #[error("Panic in {context}: {message}")]
    Panicked { context: String, message: String },

    #[error("Doom loop ({0}) detected; aborting")]
    DoomLoopAbort(LoopType),

    #[error("Doom loop ({0}) persisted after {1} recovery attempts")]
    RecoveryExhausted(LoopType, u32),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub fn agent(stage: EscalationStage, source: AgentError) -> Self {
        Self::Agent { stage, source }
    }

    /// Build a `Panicked` variant from a `catch_unwind` payload.
    pub fn panicked(context: impl Into<String>, payload: &(dyn std::any::Any + Send)) -> Self {
        Self::Panicked {
            context: context.into(),
            message: panic_message(payload),
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_names_stage() {
        let err = PipelineError::agent(
            EscalationStage::Planned,
            AgentError::Failed("model refused".into()),
        );
        assert_eq!(err.to_string(), "planned stage: Agent failed: model refused");
    }

    #[test]
    fn panic_payloads() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }

    #[test]
    fn doom_loop_messages() {
        assert_eq!(
            PipelineError::DoomLoopAbort(LoopType::ResourceExhaustion).to_string(),
            "Doom loop (resource_exhaustion) detected; aborting"
        );
        assert_eq!(
            PipelineError::RecoveryExhausted(LoopType::RepeatedFailure, 3).to_string(),
            "Doom loop (repeated_failure) persisted after 3 recovery attempts"
        );
    }
}
