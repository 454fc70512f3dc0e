//! Tracing setup and host-owned pipeline telemetry.
//!
//! There is no process-wide metrics singleton. A host creates one
//! [`PipelineTelemetry`], shares it by `Arc` with every pipeline it builds,
//! and reads it with [`PipelineTelemetry::snapshot`].

use std::sync::{Arc, Mutex, MutexGuard};

use coordination::escalation::EscalationStage;
use coordination::otel::RunSummary;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Fails if a global subscriber is already set.
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Shared, internally synchronized run counters.
#[derive(Debug, Default)]
pub struct PipelineTelemetry {
    summary: Mutex<RunSummary>,
}

impl PipelineTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for the common `Arc` case.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, RunSummary> {
        // A panic while holding the lock leaves plain counters, still usable.
        self.summary.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_stage(&self) {
        self.lock().record_stage();
    }

    pub fn record_transition(&self, from: EscalationStage, to: EscalationStage) {
        self.lock().record_transition(from, to);
    }

    pub fn record_doom_loop(&self) {
        self.lock().record_doom_loop();
    }

    pub fn record_run(&self, success: bool, tokens: u64, duration_ms: u64) {
        self.lock().record_run(success, tokens, duration_ms);
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> RunSummary {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = RunSummary::default();
    }
}
