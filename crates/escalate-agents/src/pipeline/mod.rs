//! Escalation pipeline: the async control loop.
//!
//! ## Lifecycle
//!
//! ```text
//! EscalationPipeline::execute(prompt, ctx)
//!   → SignalAnalyzer::analyze          — signals
//!   → StageAdvisor::recommend_stage    — initial stage (when use_router)
//!   → execute_at_stage:
//!       loop:
//!         dispatch stage executor      — StageOutcome, never an error
//!         record into DoomLoopDetector — recovery policy on loop
//!         ±1 stage transition          — callback notified
//!         success / ceiling / budget / cancellation checks
//!   → EscalationResult
//! ```
//!
//! A run always produces a result. Executor failures become failed
//! outcomes, loop-level errors and panics become entries in `errors`.

pub mod errors;
pub mod executors;
pub mod result;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use coordination::doom_loop::{DoomLoopConfig, DoomLoopDetector, LoopType, RecoveryAction};
use coordination::escalation::{
    EscalationConfig, EscalationStage, StageContext, StageTransition, TransitionReason,
};
use coordination::otel;
use coordination::signals::advisor::DEESCALATION_SUCCESS_WINDOW;
use coordination::signals::{
    format_signals, AnalysisContext, SignalAnalyzer, SignalSet, StageAdvisor,
};
use futures::FutureExt;
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::agent::{Agent, ToolRef};
use crate::checkpoint::{checkpoint_label, CheckpointService};
use crate::config::PipelineSettings;
use crate::telemetry::PipelineTelemetry;

pub use errors::PipelineError;
pub use result::{EscalationResult, ExecutionStats, StageOutcome};

/// Called with `(old, new)` on every stage transition.
pub type StageCallback =
    Box<dyn Fn(EscalationStage, EscalationStage) -> anyhow::Result<()> + Send + Sync>;

/// Per-run bookkeeping that does not belong in the public result.
struct RunState {
    result: EscalationResult,
    last_failure: Option<String>,
    model_escalated: bool,
}

/// Drives one agent through the escalation ladder.
pub struct EscalationPipeline {
    agent: Box<dyn Agent>,
    config: EscalationConfig,
    analyzer: SignalAnalyzer,
    advisor: StageAdvisor,
    detector: DoomLoopDetector,
    checkpoints: Option<Arc<dyn CheckpointService>>,
    stage_callback: Option<StageCallback>,
    telemetry: Option<Arc<PipelineTelemetry>>,
    cancel: CancellationToken,
    last_context: Option<StageContext>,
    /// Agent tool set swapped out by a Heuristic step that has not put it back
    saved_tools: Option<Vec<ToolRef>>,
}

impl EscalationPipeline {
    /// Build a pipeline. `config.max_identical_actions` is forwarded to the
    /// doom-loop detector; every other detector setting uses its default.
    pub fn new(agent: Box<dyn Agent>, config: EscalationConfig) -> Self {
        let doom_loop = DoomLoopConfig {
            max_identical_actions: config.max_identical_actions,
            ..Default::default()
        };
        Self {
            agent,
            analyzer: SignalAnalyzer::new(&config),
            advisor: StageAdvisor::new(),
            detector: DoomLoopDetector::new(doom_loop),
            config,
            checkpoints: None,
            stage_callback: None,
            telemetry: None,
            cancel: CancellationToken::new(),
            last_context: None,
            saved_tools: None,
        }
    }

    /// Build a pipeline from a settings file's two tables, used verbatim.
    pub fn from_settings(agent: Box<dyn Agent>, settings: PipelineSettings) -> Self {
        Self::new(agent, settings.escalation).with_doom_loop_config(settings.doom_loop)
    }

    pub fn with_checkpoint_service(mut self, service: Arc<dyn CheckpointService>) -> Self {
        self.checkpoints = Some(service);
        self
    }

    pub fn with_stage_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(EscalationStage, EscalationStage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.stage_callback = Some(Box::new(callback));
        self
    }

    /// Replace the detector configuration entirely.
    pub fn with_doom_loop_config(mut self, config: DoomLoopConfig) -> Self {
        self.detector = DoomLoopDetector::new(config);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<PipelineTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    pub fn detector(&self) -> &DoomLoopDetector {
        &self.detector
    }

    /// Context of the most recent run.
    pub fn last_context(&self) -> Option<&StageContext> {
        self.last_context.as_ref()
    }

    /// Analyze the prompt, pick a starting stage and run.
    pub async fn execute(&mut self, prompt: &str, context: &AnalysisContext) -> EscalationResult {
        let signals = self.analyzer.analyze(prompt, context);
        let stage = if self.config.use_router {
            self.advisor.recommend_stage(&signals, None)
        } else {
            EscalationStage::Direct
        };
        info!(
            stage = %stage,
            signals = %format_signals(&signals),
            routed = self.config.use_router,
            "Initial stage selected"
        );
        self.run(prompt, stage, signals).await
    }

    /// Run starting at an explicit stage.
    pub async fn execute_at_stage(
        &mut self,
        prompt: &str,
        stage: EscalationStage,
        context: &AnalysisContext,
    ) -> EscalationResult {
        let signals = self.analyzer.analyze(prompt, context);
        self.run(prompt, stage, signals).await
    }

    async fn run(
        &mut self,
        prompt: &str,
        stage: EscalationStage,
        signals: SignalSet,
    ) -> EscalationResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = otel::execute_span(&run_id, stage, &format_signals(&signals));
        let mut ctx = StageContext::new(prompt, stage, signals.clone());
        let mut state = RunState {
            result: EscalationResult::new(run_id, stage, signals),
            last_failure: None,
            model_escalated: false,
        };
        self.detector.start_session();
        // a previous run dropped mid-Heuristic may have left its subset installed
        executors::restore_tools(self.agent.as_mut(), &mut self.saved_tools);

        let outcome = AssertUnwindSafe(self.run_loop(&mut ctx, &mut state))
            .catch_unwind()
            .instrument(span.clone())
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Escalation loop failed");
                state.result.success = false;
                state.result.errors.push(e.to_string());
            }
            Err(payload) => {
                let e = PipelineError::panicked("escalation loop", payload.as_ref());
                warn!(error = %e, "Escalation loop panicked");
                state.result.success = false;
                state.result.errors.push(e.to_string());
            }
        }

        let mut result = state.result;
        if !result.success && result.errors.is_empty() {
            result.errors.push(
                state
                    .last_failure
                    .unwrap_or_else(|| "escalation ended without a successful stage".into()),
            );
        }

        let elapsed_ms = ctx.elapsed().as_millis() as u64;
        result.final_stage = ctx.stage;
        result.stats.steps = ctx.step_count();
        result.stats.tool_calls = ctx.tool_calls;
        result.stats.tokens_used = ctx.tokens_used;
        result.stats.elapsed_ms = elapsed_ms;
        result.checkpoint_id = ctx.latest_checkpoint().map(str::to_string);
        result.files_modified = ctx.files_modified.iter().cloned().collect();

        otel::record_execute_result(
            &span,
            result.success,
            result.final_stage,
            result.stats.steps,
            elapsed_ms,
        );
        if let Some(t) = &self.telemetry {
            t.record_run(result.success, result.stats.tokens_used, elapsed_ms);
        }
        info!(run_id = %result.run_id, "{}", result.summary());
        debug!(run_id = %result.run_id, context = %ctx.summary(), "Run context");

        self.last_context = Some(ctx);
        result
    }

    async fn run_loop(
        &mut self,
        ctx: &mut StageContext,
        state: &mut RunState,
    ) -> Result<(), PipelineError> {
        self.config.validate()?;
        self.detector.config().validate()?;
        let run_id = state.result.run_id.clone();

        loop {
            if self.cancel.is_cancelled() {
                state.result.warnings.push("run cancelled".into());
                break;
            }

            let stage = ctx.stage;
            let step = ctx.step_count() + 1;
            let started = Instant::now();
            let span = otel::stage_span(&stage.to_string(), step);
            let outcome = self
                .dispatch(ctx, &run_id, step)
                .instrument(span.clone())
                .await;
            let duration = started.elapsed();
            otel::record_stage_result(
                &span,
                outcome.success,
                duration.as_millis() as u64,
                outcome.tokens_used,
            );
            if let Some(t) = &self.telemetry {
                t.record_stage();
            }

            // ── Bookkeeping ──
            let action = format!("stage:{stage}");
            ctx.record_step(action.clone(), outcome.response.clone(), outcome.success);
            ctx.tool_calls += outcome.tool_calls;
            ctx.tokens_used += outcome.tokens_used;
            ctx.files_modified.extend(outcome.files_modified.iter().cloned());
            if let Some(id) = &outcome.checkpoint_id {
                ctx.checkpoint_ids.push(id.clone());
            }
            state.result.response = outcome.response.clone();
            state.result.success = outcome.success;
            if !outcome.success {
                state.last_failure = Some(outcome.failure_reason());
            }

            // ── Doom-loop check ──
            let looped = self.detector.record_action(
                &action,
                json!({ "stage": stage }),
                &outcome.response,
                outcome.success,
                duration,
            );

            if looped {
                if !self.handle_doom_loop(ctx, state, step, outcome.success).await {
                    break;
                }
            } else if outcome.success {
                if self.config.auto_deescalate
                    && self.advisor.should_deescalate(
                        &ctx.signals,
                        ctx.stage,
                        ctx.recent_steps(DEESCALATION_SUCCESS_WINDOW),
                    )
                {
                    self.transition(
                        ctx,
                        state,
                        stage.deescalate(),
                        TransitionReason::SignalsAllowDeescalation,
                    );
                }
                break;
            } else if self.config.auto_escalate && !stage.is_max() {
                self.transition(ctx, state, stage.escalate(), TransitionReason::StageFailed);
            } else if stage.is_max() {
                if self.config.escalate_model_on_failure && !state.model_escalated {
                    state.model_escalated = true;
                    if self.agent.escalate_model() {
                        info!("Switched agent to a stronger model at the top stage");
                        state
                            .result
                            .warnings
                            .push("escalated agent model after autonomous failure".into());
                    } else {
                        debug!("Agent has no stronger model");
                        break;
                    }
                } else {
                    break;
                }
            }

            if let Some(reason) = self.budget_exceeded(ctx) {
                warn!(reason = %reason, "Budget exhausted");
                state.result.warnings.push(reason);
                break;
            }
        }
        Ok(())
    }

    /// Apply the detector's recovery policy. Returns whether to keep looping.
    ///
    /// Abort and exhausted recovery fail the run even when the step itself
    /// succeeded. Otherwise a successful step still ends the run.
    async fn handle_doom_loop(
        &mut self,
        ctx: &StageContext,
        state: &mut RunState,
        step: u32,
        succeeded: bool,
    ) -> bool {
        let loop_type = self
            .detector
            .get_loop_type()
            .unwrap_or(LoopType::RepeatedFailure);
        let recovery = self.detector.get_recovery_action();
        let attempt = self.detector.recovery_attempts();
        let span = otel::doom_loop_span(
            &loop_type.to_string(),
            &recovery.to_string(),
            attempt,
            step,
        );
        state.result.stats.doom_loops += 1;
        if let Some(t) = &self.telemetry {
            t.record_doom_loop();
        }

        match recovery {
            RecoveryAction::Abort => {
                state.result.success = false;
                state
                    .result
                    .errors
                    .push(PipelineError::DoomLoopAbort(loop_type).to_string());
                return false;
            }
            RecoveryAction::RequestHelp => {
                state.result.response = clarification_message(loop_type, &ctx.prompt);
                state
                    .result
                    .warnings
                    .push(format!("doom loop ({loop_type}): requesting help"));
                return false;
            }
            RecoveryAction::EscalateModel => {
                state
                    .result
                    .warnings
                    .push(format!("doom loop ({loop_type}): escalating model"));
                if self.config.escalate_model_on_failure {
                    let switched = self.agent.escalate_model();
                    info!(switched, "Model escalation requested by recovery policy");
                }
            }
            RecoveryAction::RetryDifferent => {
                state
                    .result
                    .warnings
                    .push(format!("doom loop ({loop_type}): retrying with a different approach"));
            }
            RecoveryAction::Continue => {}
        }

        if !self.detector.increment_recovery() {
            state.result.success = false;
            state.result.errors.push(
                PipelineError::RecoveryExhausted(loop_type, self.detector.recovery_attempts())
                    .to_string(),
            );
            return false;
        }

        if succeeded {
            debug!(loop_type = %loop_type, "Loop flagged on a successful step; finishing");
            return false;
        }

        if let Some(reason) = self.budget_exceeded(ctx) {
            state.result.warnings.push(reason);
            return false;
        }

        let backoff = self
            .detector
            .apply_backoff_cancellable(&self.cancel)
            .instrument(span)
            .await;
        match backoff {
            Some(delay) => {
                debug!(delay_ms = delay.as_millis() as u64, "Backoff complete");
                true
            }
            None => {
                state.result.warnings.push("run cancelled during backoff".into());
                false
            }
        }
    }

    async fn dispatch(&mut self, ctx: &StageContext, run_id: &str, step: u32) -> StageOutcome {
        let stage = ctx.stage;
        let label = checkpoint_label(run_id, step);
        let checkpoint = self
            .checkpoints
            .as_deref()
            .map(|service| (service, label.as_str()));
        let agent = self.agent.as_mut();
        let saved_tools = &mut self.saved_tools;
        let config = &self.config;
        let cancel = &self.cancel;

        let fut = async move {
            match stage {
                EscalationStage::Direct => {
                    executors::run_direct(agent, &ctx.prompt, config, cancel).await
                }
                EscalationStage::Heuristic => {
                    executors::run_heuristic(
                        agent,
                        &ctx.prompt,
                        &ctx.signals,
                        config,
                        cancel,
                        saved_tools,
                    )
                    .await
                }
                EscalationStage::Planned => {
                    executors::run_planned(agent, &ctx.prompt, config, cancel).await
                }
                EscalationStage::Autonomous => {
                    executors::run_autonomous(agent, &ctx.prompt, config, cancel, checkpoint)
                        .await
                }
            }
        };

        let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let e = PipelineError::panicked(format!("{stage} executor"), payload.as_ref());
                warn!(error = %e, "Stage executor panicked");
                StageOutcome::failed(e.to_string())
            }
        };

        if stage == EscalationStage::Autonomous && outcome.success {
            self.detector.mark_progress("autonomous stage completed");
        }
        outcome
    }

    fn transition(
        &mut self,
        ctx: &mut StageContext,
        state: &mut RunState,
        to: EscalationStage,
        reason: TransitionReason,
    ) {
        let from = ctx.stage;
        if from == to {
            return;
        }
        let step = ctx.step_count();
        let _span = otel::transition_span(from, to, &reason.to_string(), step).entered();
        info!(from = %from, to = %to, reason = %reason, step, "Stage transition");

        ctx.stage = to;
        if to > from {
            state.result.escalations += 1;
        } else {
            state.result.deescalations += 1;
        }
        state.result.stage_history.push(StageTransition {
            from,
            to,
            reason,
            at_step: step,
        });
        if let Some(t) = &self.telemetry {
            t.record_transition(from, to);
        }
        self.notify_stage_change(from, to);
    }

    fn notify_stage_change(&self, from: EscalationStage, to: EscalationStage) {
        let Some(callback) = &self.stage_callback else {
            return;
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| callback(from, to))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, from = %from, to = %to, "Stage callback failed"),
            Err(payload) => {
                let e = PipelineError::panicked("stage callback", payload.as_ref());
                warn!(error = %e, from = %from, to = %to, "Stage callback panicked");
            }
        }
    }

    /// Time and steps run out when the limit is reached; tool calls and
    /// tokens only once usage goes past the limit.
    fn budget_exceeded(&self, ctx: &StageContext) -> Option<String> {
        if self.cancel.is_cancelled() {
            return Some("run cancelled".into());
        }
        if ctx.elapsed() >= self.config.max_time() {
            return Some(format!(
                "time budget of {}s exhausted",
                self.config.max_time_seconds
            ));
        }
        if ctx.tool_calls > self.config.max_tool_calls {
            return Some(format!(
                "tool-call budget of {} exhausted",
                self.config.max_tool_calls
            ));
        }
        if ctx.tokens_used > self.config.max_tokens {
            return Some(format!(
                "token budget of {} exhausted",
                self.config.max_tokens
            ));
        }
        if ctx.step_count() >= self.config.max_steps {
            return Some(format!("step budget of {} exhausted", self.config.max_steps));
        }
        None
    }
}

/// Response shown when the pipeline stops to ask the user for help.
fn clarification_message(loop_type: LoopType, prompt: &str) -> String {
    let preview: String = prompt.chars().take(80).collect();
    format!(
        "I'm not making progress on \"{preview}\" ({loop_type}). \
         Could you clarify what you need, or suggest a different approach?"
    )
}
