//! Pipeline settings file.
//!
//! ```toml
//! [escalation]
//! max_steps = 8
//! use_router = true
//!
//! [doom_loop]
//! max_recovery_attempts = 2
//! initial_backoff = 0.5
//! ```
//!
//! Missing tables and fields fall back to defaults. `ESCALATION_*` and
//! `DOOM_LOOP_*` environment variables override file values.

use std::path::Path;

use anyhow::{Context, Result};
use coordination::doom_loop::DoomLoopConfig;
use coordination::escalation::EscalationConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming a settings file.
pub const SETTINGS_PATH_ENV: &str = "ESCALATION_SETTINGS";

/// Both config tables of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub escalation: EscalationConfig,
    pub doom_loop: DoomLoopConfig,
}

impl PipelineSettings {
    /// Parse TOML text without applying environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text).context("invalid pipeline settings TOML")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load a settings file, apply environment overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        settings.apply_env()?;
        settings.validate()?;
        tracing::info!(path = %path.display(), "Loaded pipeline settings");
        Ok(settings)
    }

    /// Defaults plus environment overrides; reads the file named by
    /// `ESCALATION_SETTINGS` when set.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var(SETTINGS_PATH_ENV) {
            return Self::load(path);
        }
        let mut settings = Self::default();
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.escalation
            .apply_env()
            .context("invalid ESCALATION_* override")?;
        self.doom_loop
            .apply_env()
            .context("invalid DOOM_LOOP_* override")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.escalation
            .validate()
            .context("invalid [escalation] settings")?;
        self.doom_loop
            .validate()
            .context("invalid [doom_loop] settings")?;
        Ok(())
    }
}
