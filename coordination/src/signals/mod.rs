//! Signal analysis and stage advice
//!
//! - [`analyzer`]: prompt + context to a set of [`EscalationSignal`]s
//! - [`advisor`]: signal set to a recommended [`EscalationStage`](crate::escalation::state::EscalationStage)

pub mod advisor;
pub mod analyzer;
pub mod types;

pub use advisor::StageAdvisor;
pub use analyzer::{AnalysisContext, SignalAnalyzer};
pub use types::{format_signals, EscalationSignal, SignalGroup, SignalSet};
