//! Async progressive-escalation orchestrator.
//!
//! Drives one [`Agent`](agent::Agent) through the four autonomy stages
//! defined in `coordination::escalation`, guarded by the doom-loop detector.
//!
//! ## Modules
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `agent`      | Agent, tool and tool-provider contracts              |
//! | `checkpoint` | Checkpoint service contract                          |
//! | `config`     | TOML settings file with env overrides                |
//! | `pipeline`   | `EscalationPipeline`, stage executors, run results   |
//! | `telemetry`  | Subscriber init and host-owned run counters          |

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod pipeline;
pub mod telemetry;

pub use agent::{Agent, AgentError, AgentReply, NamedTool, Tool, ToolProvider, ToolRef};
pub use checkpoint::{CheckpointError, CheckpointService};
pub use config::PipelineSettings;
pub use pipeline::{
    EscalationPipeline, EscalationResult, ExecutionStats, PipelineError, StageCallback,
    StageOutcome,
};
pub use telemetry::{init_tracing, PipelineTelemetry};
