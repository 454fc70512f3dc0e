//! Configuration error types
//!
//! Every config surface in this crate (`EscalationConfig`, `DoomLoopConfig`)
//! validates through [`ConfigError`] so callers get one error shape no matter
//! which table was wrong.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while building or loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// An environment override could not be parsed
    #[error("Invalid environment override {var}={value}")]
    InvalidEnv { var: String, value: String },

    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an invalid environment override error
    pub fn invalid_env(var: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidEnv {
            var: var.into(),
            value: value.into(),
        }
    }

    /// The offending field or variable name, when the error carries one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidValue { field, .. } => Some(field),
            Self::InvalidEnv { var, .. } => Some(var),
            _ => None,
        }
    }
}

/// Read a config file, reporting the path on failure.
pub(crate) fn read_config_file(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read an environment variable and parse it, reporting the variable on failure.
///
/// Returns `Ok(None)` when the variable is unset.
pub(crate) fn env_override<T: std::str::FromStr>(var: &str) -> ConfigResult<Option<T>> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid_env(var, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_display() {
        let err = ConfigError::invalid("max_backoff", "must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid value for max_backoff: must be positive"
        );
        assert_eq!(err.field(), Some("max_backoff"));
    }

    #[test]
    fn test_toml_error_converts() {
        let parse: Result<toml::Value, _> = toml::from_str("max_steps = = 3");
        let err: ConfigError = parse.unwrap_err().into();
        assert!(matches!(err, ConfigError::Toml(_)));
        assert!(err.field().is_none());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = read_config_file(Path::new("/no/such/escalation.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/no/such/escalation.toml"));
    }

    #[test]
    fn test_env_override_unset_is_none() {
        let v: Option<u32> = env_override("COORDINATION_TEST_SURELY_UNSET_VAR").unwrap();
        assert!(v.is_none());
    }
}
