//! Checkpoint service contract.
//!
//! The pipeline asks for a save-point before autonomous execution. The
//! returned id is opaque; failures are logged and never stop a run.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint save failed: {0}")]
    SaveFailed(String),

    #[error("Checkpoint service unavailable: {0}")]
    Unavailable(String),
}

/// External save-point provider (git stash, snapshot store, ...).
#[async_trait]
pub trait CheckpointService: Send + Sync {
    /// Save a checkpoint and return its id.
    async fn save(&self, label: &str) -> Result<String, CheckpointError>;
}

/// Checkpoint label for a pipeline step.
pub fn checkpoint_label(run_id: &str, step: u32) -> String {
    format!("escalation-{run_id}-step-{step}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_format() {
        assert_eq!(checkpoint_label("abc", 3), "escalation-abc-step-3");
    }

    #[test]
    fn error_display() {
        let err = CheckpointError::SaveFailed("disk full".into());
        assert_eq!(err.to_string(), "Checkpoint save failed: disk full");
    }
}
