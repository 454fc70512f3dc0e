//! Escalation Config — thresholds and budgets for the escalation pipeline
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`ESCALATION_*`)
//! 2. Values from a TOML `[escalation]` table
//! 3. Built-in defaults

use crate::error::{env_override, read_config_file, ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for signal analysis, stage execution and run budgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Word count above which a prompt is considered long
    pub long_prompt_threshold: usize,
    /// Complex keyword hits needed for the complex-keywords signal
    pub complex_keyword_threshold: usize,
    /// Maximum loop iterations per run
    pub max_steps: u32,
    /// Wall-clock budget per run, in seconds
    pub max_time_seconds: u64,
    /// Token budget per run
    pub max_tokens: u64,
    /// Tool-call budget per run
    pub max_tool_calls: u32,
    /// Maximum tools handed to the agent at the Heuristic stage
    pub heuristic_max_tools: usize,
    /// Maximum plan steps requested at the Planned stage
    pub planned_max_steps: usize,
    /// Move up one stage when a stage fails
    pub auto_escalate: bool,
    /// Move down one stage when signals allow after a success
    pub auto_deescalate: bool,
    /// Withhold write-capable tools and ask for confirmation before writes
    pub require_approval_for_writes: bool,
    /// Save a checkpoint before autonomous execution
    pub enable_checkpoints: bool,
    /// Retries for transient agent errors within one stage execution
    pub max_retries: u32,
    /// Identical-action threshold forwarded to the doom-loop detector
    pub max_identical_actions: usize,
    /// Growth factor for transient-error retry delays
    pub backoff_factor: f64,
    /// Pick the initial stage from signals instead of starting at Direct
    pub use_router: bool,
    /// Ask the agent for a stronger model when stuck
    pub escalate_model_on_failure: bool,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            long_prompt_threshold: 100,
            complex_keyword_threshold: 2,
            max_steps: 10,
            max_time_seconds: 300,
            max_tokens: 100_000,
            max_tool_calls: 50,
            heuristic_max_tools: 5,
            planned_max_steps: 5,
            auto_escalate: true,
            auto_deescalate: true,
            require_approval_for_writes: false,
            enable_checkpoints: true,
            max_retries: 2,
            max_identical_actions: 3,
            backoff_factor: 2.0,
            use_router: true,
            escalate_model_on_failure: false,
        }
    }
}

impl EscalationConfig {
    /// Wall-clock budget as a `Duration`
    pub fn max_time(&self) -> Duration {
        Duration::from_secs(self.max_time_seconds)
    }

    /// Parse a config from TOML text (fields not present keep their defaults)
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a standalone TOML file holding just this table's fields
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::from_toml_str(&read_config_file(path.as_ref())?)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ESCALATION_*` environment overrides in place
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        if let Some(v) = env_override("ESCALATION_LONG_PROMPT_THRESHOLD")? {
            self.long_prompt_threshold = v;
        }
        if let Some(v) = env_override("ESCALATION_COMPLEX_KEYWORD_THRESHOLD")? {
            self.complex_keyword_threshold = v;
        }
        if let Some(v) = env_override("ESCALATION_MAX_STEPS")? {
            self.max_steps = v;
        }
        if let Some(v) = env_override("ESCALATION_MAX_TIME_SECONDS")? {
            self.max_time_seconds = v;
        }
        if let Some(v) = env_override("ESCALATION_MAX_TOKENS")? {
            self.max_tokens = v;
        }
        if let Some(v) = env_override("ESCALATION_MAX_TOOL_CALLS")? {
            self.max_tool_calls = v;
        }
        if let Some(v) = env_override("ESCALATION_HEURISTIC_MAX_TOOLS")? {
            self.heuristic_max_tools = v;
        }
        if let Some(v) = env_override("ESCALATION_PLANNED_MAX_STEPS")? {
            self.planned_max_steps = v;
        }
        if let Some(v) = env_override("ESCALATION_AUTO_ESCALATE")? {
            self.auto_escalate = v;
        }
        if let Some(v) = env_override("ESCALATION_AUTO_DEESCALATE")? {
            self.auto_deescalate = v;
        }
        if let Some(v) = env_override("ESCALATION_REQUIRE_APPROVAL_FOR_WRITES")? {
            self.require_approval_for_writes = v;
        }
        if let Some(v) = env_override("ESCALATION_ENABLE_CHECKPOINTS")? {
            self.enable_checkpoints = v;
        }
        if let Some(v) = env_override("ESCALATION_MAX_RETRIES")? {
            self.max_retries = v;
        }
        if let Some(v) = env_override("ESCALATION_MAX_IDENTICAL_ACTIONS")? {
            self.max_identical_actions = v;
        }
        if let Some(v) = env_override("ESCALATION_BACKOFF_FACTOR")? {
            self.backoff_factor = v;
        }
        if let Some(v) = env_override("ESCALATION_USE_ROUTER")? {
            self.use_router = v;
        }
        if let Some(v) = env_override("ESCALATION_ESCALATE_MODEL_ON_FAILURE")? {
            self.escalate_model_on_failure = v;
        }
        Ok(())
    }

    /// Reject values that would make the pipeline loop forever or never run
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_steps == 0 {
            return Err(ConfigError::invalid("max_steps", "must be at least 1"));
        }
        if self.max_time_seconds == 0 {
            return Err(ConfigError::invalid(
                "max_time_seconds",
                "must be at least 1",
            ));
        }
        if self.heuristic_max_tools == 0 {
            return Err(ConfigError::invalid(
                "heuristic_max_tools",
                "must be at least 1",
            ));
        }
        if self.planned_max_steps == 0 {
            return Err(ConfigError::invalid(
                "planned_max_steps",
                "must be at least 1",
            ));
        }
        if self.complex_keyword_threshold == 0 {
            return Err(ConfigError::invalid(
                "complex_keyword_threshold",
                "must be at least 1",
            ));
        }
        if self.max_identical_actions < 2 {
            return Err(ConfigError::invalid(
                "max_identical_actions",
                "must be at least 2",
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid(
                "backoff_factor",
                format!("must be >= 1.0, got {}", self.backoff_factor),
            ));
        }
        Ok(())
    }
}
