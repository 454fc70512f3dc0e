//! Escalation — autonomy stages, run configuration and per-run context
//!
//! # Escalation Ladder
//!
//! ```text
//! Direct       plain chat
//!     │  stage failed (auto_escalate)          ▲ signals allow (auto_deescalate)
//!     ▼                                        │
//! Heuristic    signal-selected tool subset
//!     │                                        ▲
//!     ▼                                        │
//! Planned      plan, then execute
//!     │                                        ▲
//!     ▼                                        │
//! Autonomous   checkpoint, unrestricted tools, verify
//! ```
//!
//! Every move is exactly one stage. Nothing here calls a model; the async
//! loop that drives these types lives in the agents crate.

pub mod config;
pub mod context;
pub mod state;

pub use config::EscalationConfig;
pub use context::{StageContext, StepRecord};
pub use state::{EscalationStage, StageTransition, TransitionReason};
