//! Doom-loop detector configuration
//!
//! Same precedence as `EscalationConfig`: `DOOM_LOOP_*` environment
//! overrides, then the TOML `[doom_loop]` table, then defaults.

use crate::error::{env_override, read_config_file, ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Window sizes, time limits, recovery policy and backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoomLoopConfig {
    /// Identical consecutive actions that count as a loop
    pub max_identical_actions: usize,
    /// Window for the dominant-action-type check
    pub max_similar_actions: usize,
    /// Consecutive failures that count as a loop
    pub max_consecutive_failures: usize,
    /// Window for the no-progress check
    pub max_no_progress_steps: usize,
    /// Share of the similar-actions window one action type must cover (0, 1]
    pub similarity_threshold: f64,
    /// Actions slower than this are counted as slow (seconds)
    pub max_time_per_action: f64,
    /// Session wall-clock limit (seconds)
    pub max_total_time: f64,
    pub enable_auto_recovery: bool,
    pub max_recovery_attempts: u32,
    /// Suggest a model switch on the second recovery attempt
    pub escalate_on_loop: bool,
    /// First backoff delay (seconds)
    pub initial_backoff: f64,
    pub backoff_multiplier: f64,
    /// Backoff ceiling (seconds)
    pub max_backoff: f64,
}

impl Default for DoomLoopConfig {
    fn default() -> Self {
        Self {
            max_identical_actions: 3,
            max_similar_actions: 5,
            max_consecutive_failures: 3,
            max_no_progress_steps: 5,
            similarity_threshold: 0.9,
            max_time_per_action: 60.0,
            max_total_time: 300.0,
            enable_auto_recovery: true,
            max_recovery_attempts: 3,
            escalate_on_loop: true,
            initial_backoff: 1.0,
            backoff_multiplier: 2.0,
            max_backoff: 30.0,
        }
    }
}

impl DoomLoopConfig {
    /// Largest window any check needs; sizes the detection ring buffer.
    pub fn window_capacity(&self) -> usize {
        self.max_identical_actions
            .max(self.max_similar_actions)
            .max(self.max_consecutive_failures)
            .max(self.max_no_progress_steps)
    }

    /// Entries the dominant action type must cover in the similar-actions window
    pub fn similar_required(&self) -> usize {
        let required = (self.similarity_threshold * self.max_similar_actions as f64).ceil();
        (required as usize).clamp(1, self.max_similar_actions)
    }

    pub fn max_time_per_action(&self) -> Duration {
        seconds(self.max_time_per_action)
    }

    pub fn max_total_time(&self) -> Duration {
        seconds(self.max_total_time)
    }

    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a standalone TOML file holding just this table's fields
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::from_toml_str(&read_config_file(path.as_ref())?)
    }

    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DOOM_LOOP_*` environment overrides in place
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        if let Some(v) = env_override("DOOM_LOOP_MAX_IDENTICAL_ACTIONS")? {
            self.max_identical_actions = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_MAX_SIMILAR_ACTIONS")? {
            self.max_similar_actions = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_MAX_CONSECUTIVE_FAILURES")? {
            self.max_consecutive_failures = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_MAX_NO_PROGRESS_STEPS")? {
            self.max_no_progress_steps = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_SIMILARITY_THRESHOLD")? {
            self.similarity_threshold = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_MAX_TIME_PER_ACTION")? {
            self.max_time_per_action = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_MAX_TOTAL_TIME")? {
            self.max_total_time = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_ENABLE_AUTO_RECOVERY")? {
            self.enable_auto_recovery = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_MAX_RECOVERY_ATTEMPTS")? {
            self.max_recovery_attempts = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_ESCALATE_ON_LOOP")? {
            self.escalate_on_loop = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_INITIAL_BACKOFF")? {
            self.initial_backoff = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_BACKOFF_MULTIPLIER")? {
            self.backoff_multiplier = v;
        }
        if let Some(v) = env_override("DOOM_LOOP_MAX_BACKOFF")? {
            self.max_backoff = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("max_identical_actions", self.max_identical_actions),
            ("max_similar_actions", self.max_similar_actions),
            ("max_consecutive_failures", self.max_consecutive_failures),
            ("max_no_progress_steps", self.max_no_progress_steps),
        ] {
            if value < 2 {
                return Err(ConfigError::invalid(field, "window must be at least 2"));
            }
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "similarity_threshold",
                format!("must be in (0, 1], got {}", self.similarity_threshold),
            ));
        }
        for (field, value) in [
            ("max_time_per_action", self.max_time_per_action),
            ("max_total_time", self.max_total_time),
            ("max_backoff", self.max_backoff),
        ] {
            if value <= 0.0 || Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be a positive, representable number of seconds, got {value}"),
                ));
            }
        }
        if !self.initial_backoff.is_finite() || self.initial_backoff < 0.0 {
            return Err(ConfigError::invalid("initial_backoff", "must be >= 0"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid("backoff_multiplier", "must be >= 1.0"));
        }
        Ok(())
    }
}

/// Seconds to a `Duration`, saturating out-of-range values instead of panicking.
/// Negative and NaN inputs map to zero.
pub(crate) fn seconds(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DoomLoopConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_capacity(), 5);
        // ceil(0.9 * 5) == 5: every entry must share the type
        assert_eq!(config.similar_required(), 5);
    }

    #[test]
    fn test_similar_required_rounds_up() {
        let config = DoomLoopConfig {
            similarity_threshold: 0.5,
            max_similar_actions: 5,
            ..Default::default()
        };
        assert_eq!(config.similar_required(), 3);
    }

    #[test]
    fn test_window_capacity_tracks_largest_window() {
        let config = DoomLoopConfig {
            max_no_progress_steps: 8,
            ..Default::default()
        };
        assert_eq!(config.window_capacity(), 8);
    }

    #[test]
    fn test_toml_table() {
        let config = DoomLoopConfig::from_toml_str(
            r#"
max_recovery_attempts = 1
escalate_on_loop = false
initial_backoff = 0.25
"#,
        )
        .unwrap();
        assert_eq!(config.max_recovery_attempts, 1);
        assert!(!config.escalate_on_loop);
        assert_eq!(config.initial_backoff, 0.25);
        assert_eq!(config.max_backoff, 30.0);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let config = DoomLoopConfig {
            similarity_threshold: 1.5,
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err().field(),
            Some("similarity_threshold")
        );
    }

    #[test]
    fn test_tiny_window_rejected() {
        let config = DoomLoopConfig {
            max_consecutive_failures: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_seconds_rejected() {
        let config = DoomLoopConfig {
            max_total_time: 1e20,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().field(), Some("max_total_time"));

        let config = DoomLoopConfig {
            max_backoff: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().field(), Some("max_backoff"));
    }

    #[test]
    fn test_out_of_range_seconds_saturate() {
        let config = DoomLoopConfig {
            max_total_time: 1e20,
            max_time_per_action: -1.0,
            ..Default::default()
        };
        assert_eq!(config.max_total_time(), Duration::MAX);
        assert_eq!(config.max_time_per_action(), Duration::ZERO);
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doom_loop.toml");
        std::fs::write(&path, "max_consecutive_failures = 4\nmax_backoff = 10.0\n").unwrap();
        let config = DoomLoopConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.max_consecutive_failures, 4);
        assert_eq!(config.max_backoff, 10.0);
        assert_eq!(config.max_recovery_attempts, 3);
    }

    #[test]
    fn test_from_toml_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doom_loop.toml");
        std::fs::write(&path, "max_total_time = 1e20\n").unwrap();
        let err = DoomLoopConfig::from_toml_file(&path).unwrap_err();
        assert_eq!(err.field(), Some("max_total_time"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = DoomLoopConfig::from_toml_file("/no/such/doom_loop.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
