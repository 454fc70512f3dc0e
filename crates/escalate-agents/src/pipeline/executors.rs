//! Stage executors.
//!
//! One function per stage. Each returns a [`StageOutcome`]; agent errors and
//! panics inside the agent call are converted into failed outcomes here.
//!
//! | Stage      | Prompt                        | Tools                          |
//! |------------|-------------------------------|--------------------------------|
//! | Direct     | as given                      | unchanged                      |
//! | Heuristic  | as given                      | signal-selected subset         |
//! | Planned    | plan (≤ N steps) then execute | unchanged                      |
//! | Autonomous | operate autonomously, verify  | unchanged, checkpoint first    |

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use coordination::escalation::{EscalationConfig, EscalationStage};
use coordination::signals::{EscalationSignal, SignalSet};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::PipelineError;
use super::result::StageOutcome;
use crate::agent::{Agent, AgentError, AgentReply, ToolRef};
use crate::checkpoint::CheckpointService;

/// Base delay for transient-error retries.
const RETRY_BASE_DELAY_SECS: f64 = 0.5;

/// Tools used when no signal maps to any available tool.
const FALLBACK_TOOL_COUNT: usize = 3;

/// Tool-name substrings each signal asks for.
fn tool_patterns(signal: EscalationSignal) -> &'static [&'static str] {
    match signal {
        EscalationSignal::FileReferences => &["read_file", "list_files", "glob"],
        EscalationSignal::EditIntent => &["write_file", "edit_file", "patch"],
        EscalationSignal::TestIntent | EscalationSignal::BuildIntent => &["run_command", "shell"],
        EscalationSignal::CodeBlocks => &["read_file", "write_file"],
        EscalationSignal::RepoContext => &["list_files", "grep", "glob"],
        _ => &[],
    }
}

/// Choose at most `max` tools for the Heuristic stage.
pub fn select_tools(
    available: &[ToolRef],
    signals: &SignalSet,
    max: usize,
    withhold_writes: bool,
) -> Vec<ToolRef> {
    let allowed: Vec<&ToolRef> = available
        .iter()
        .filter(|t| !(withhold_writes && t.is_write()))
        .collect();

    let mut selected: Vec<ToolRef> = Vec::new();
    for signal in signals {
        for pattern in tool_patterns(*signal) {
            for tool in &allowed {
                if selected.len() >= max {
                    return selected;
                }
                let name = tool.name().to_lowercase();
                let already = selected.iter().any(|s| s.name() == tool.name());
                if !already && name.contains(pattern) {
                    selected.push(ToolRef::clone(tool));
                }
            }
        }
    }

    if selected.is_empty() {
        selected = allowed
            .into_iter()
            .take(FALLBACK_TOOL_COUNT.min(max))
            .cloned()
            .collect();
    }
    selected
}

/// Delay before retry number `attempt` (0-based).
pub fn retry_delay(backoff_factor: f64, attempt: u32) -> Duration {
    let secs = RETRY_BASE_DELAY_SECS * backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

pub fn planned_prompt(prompt: &str, max_steps: usize) -> String {
    format!(
        "Task: {prompt}\n\n\
         First write a short plan of at most {max_steps} numbered steps. \
         Then carry out the plan step by step and report the result of each step."
    )
}

pub fn autonomous_prompt(prompt: &str, require_approval: bool) -> String {
    let mut text = format!(
        "You are operating autonomously on the following task.\n\n\
         Task: {prompt}\n\n\
         Use whatever tools you need and keep going until the task is complete. \
         When you are done, verify your work (re-read changed files, run the relevant \
         tests or builds) and summarize what you changed."
    );
    if require_approval {
        text.push_str(
            "\n\nBefore modifying any file, describe the change and ask for confirmation.",
        );
    }
    text
}

/// Call the agent, retrying retriable errors with growing delays.
async fn chat_with_retry(
    agent: &mut dyn Agent,
    prompt: &str,
    config: &EscalationConfig,
    cancel: &CancellationToken,
) -> Result<AgentReply, AgentError> {
    let mut attempt: u32 = 0;
    loop {
        match agent.chat(prompt).await {
            Ok(reply) => return Ok(reply),
            Err(e) if e.is_retriable() && attempt < config.max_retries => {
                let delay = retry_delay(config.backoff_factor, attempt);
                warn!(
                    agent = agent.name(),
                    attempt = attempt + 1,
                    max = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retriable agent error; retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run one agent call with retries and panic isolation, then build the outcome.
async fn guarded_chat(
    agent: &mut dyn Agent,
    stage: EscalationStage,
    prompt: &str,
    config: &EscalationConfig,
    cancel: &CancellationToken,
) -> StageOutcome {
    let result = AssertUnwindSafe(chat_with_retry(agent, prompt, config, cancel))
        .catch_unwind()
        .await;

    let error = match result {
        Ok(Ok(reply)) if reply.text.trim().is_empty() => {
            let error = PipelineError::EmptyResponse(stage);
            warn!(stage = %stage, error = %error, "Stage executor failed");
            // an empty reply still spent budget
            let mut outcome = StageOutcome::failed(error.to_string());
            outcome.tool_calls = reply.tool_calls.unwrap_or(0);
            outcome.tokens_used = reply.tokens_used.unwrap_or(0);
            return outcome;
        }
        Ok(Ok(reply)) => {
            let tokens = reply
                .tokens_used
                .unwrap_or(((prompt.len() + reply.text.len()) / 4) as u64);
            return StageOutcome {
                response: reply.text,
                success: true,
                error: None,
                tool_calls: reply.tool_calls.unwrap_or(0),
                tokens_used: tokens,
                files_modified: reply.files_modified,
                checkpoint_id: None,
            };
        }
        Ok(Err(e)) => PipelineError::agent(stage, e),
        Err(payload) => PipelineError::panicked(format!("{stage} agent call"), payload.as_ref()),
    };

    warn!(stage = %stage, error = %error, "Stage executor failed");
    StageOutcome::failed(error.to_string())
}

// ── Executors ────────────────────────────────────────────────────────────────

pub async fn run_direct(
    agent: &mut dyn Agent,
    prompt: &str,
    config: &EscalationConfig,
    cancel: &CancellationToken,
) -> StageOutcome {
    guarded_chat(agent, EscalationStage::Direct, prompt, config, cancel).await
}

/// Swap in a signal-selected tool subset for one call, then restore.
///
/// The full set is parked in `saved` while the subset is installed, so a
/// caller whose future is dropped mid-call can still put it back with
/// [`restore_tools`].
pub async fn run_heuristic(
    agent: &mut dyn Agent,
    prompt: &str,
    signals: &SignalSet,
    config: &EscalationConfig,
    cancel: &CancellationToken,
    saved: &mut Option<Vec<ToolRef>>,
) -> StageOutcome {
    restore_tools(agent, saved);
    if let Some(provider) = agent.tool_provider() {
        let original = provider.tools();
        let selected = select_tools(
            &original,
            signals,
            config.heuristic_max_tools,
            config.require_approval_for_writes,
        );
        debug!(
            available = original.len(),
            selected = selected.len(),
            tools = ?selected.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
            "Heuristic tool selection"
        );
        *saved = Some(original);
        provider.set_tools(selected);
    }

    let outcome = guarded_chat(agent, EscalationStage::Heuristic, prompt, config, cancel).await;
    restore_tools(agent, saved);
    outcome
}

/// Reinstall a tool set parked by [`run_heuristic`]. No-op when none is parked.
pub fn restore_tools(agent: &mut dyn Agent, saved: &mut Option<Vec<ToolRef>>) {
    let Some(original) = saved.take() else {
        return;
    };
    if let Some(provider) = agent.tool_provider() {
        debug!(tools = original.len(), "Restoring agent tool set");
        provider.set_tools(original);
    }
}

pub async fn run_planned(
    agent: &mut dyn Agent,
    prompt: &str,
    config: &EscalationConfig,
    cancel: &CancellationToken,
) -> StageOutcome {
    let prompt = planned_prompt(prompt, config.planned_max_steps);
    guarded_chat(agent, EscalationStage::Planned, &prompt, config, cancel).await
}

/// Save a checkpoint (non-fatal), then run unrestricted.
pub async fn run_autonomous(
    agent: &mut dyn Agent,
    prompt: &str,
    config: &EscalationConfig,
    cancel: &CancellationToken,
    checkpoint: Option<(&dyn CheckpointService, &str)>,
) -> StageOutcome {
    let mut checkpoint_id = None;
    if config.enable_checkpoints {
        if let Some((service, label)) = checkpoint {
            match AssertUnwindSafe(service.save(label)).catch_unwind().await {
                Ok(Ok(id)) => {
                    info!(checkpoint_id = %id, label, "Checkpoint saved");
                    checkpoint_id = Some(id);
                }
                Ok(Err(e)) => warn!(error = %e, label, "Checkpoint failed; continuing"),
                Err(payload) => {
                    let err = PipelineError::panicked("checkpoint service", payload.as_ref());
                    warn!(error = %err, label, "Checkpoint failed; continuing");
                }
            }
        }
    }

    let prompt = autonomous_prompt(prompt, config.require_approval_for_writes);
    let mut outcome =
        guarded_chat(agent, EscalationStage::Autonomous, &prompt, config, cancel).await;
    outcome.checkpoint_id = checkpoint_id;
    outcome
}
