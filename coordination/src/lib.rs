//! Progressive Escalation Coordination Library
//!
//! Deterministic, model-free building blocks for deciding how much autonomy
//! an agent gets on a task:
//!
//! - [`signals`]: heuristic prompt analysis and stage advice
//! - [`escalation`]: the four-stage ladder, run config and per-run context
//! - [`doom_loop`]: repetition, failure and stagnation detection with
//!   recovery policy and backoff
//! - [`otel`]: span builders for structured tracing
//!
//! The async orchestrator that drives these types against a live agent
//! lives in the `escalate-agents` crate.

#![allow(clippy::uninlined_format_args)]

pub mod doom_loop;
pub mod error;
pub mod escalation;
pub mod otel;
pub mod signals;

pub use doom_loop::{
    DoomLoopConfig, DoomLoopDetector, DoomLoopEvent, DoomLoopStats, LoopType, RecoveryAction,
};
pub use error::{ConfigError, ConfigResult};
pub use escalation::{
    EscalationConfig, EscalationStage, StageContext, StageTransition, StepRecord,
    TransitionReason,
};
pub use otel::RunSummary;
pub use signals::{AnalysisContext, EscalationSignal, SignalAnalyzer, SignalSet, StageAdvisor};
