//! Action records, loop classifications and fingerprinting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Results longer than this are truncated before hashing.
pub const RESULT_HASH_CHARS: usize = 1000;

/// Hex characters kept from the BLAKE3 digest.
pub const FINGERPRINT_HEX_LEN: usize = 16;

/// One recorded agent action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Monotonic sequence number within the session (starts at 1)
    pub seq: u64,
    pub action_type: String,
    /// Fingerprint of action type + canonical args
    pub action_hash: String,
    /// Fingerprint of canonical args alone
    pub args_hash: String,
    /// Fingerprint of the (truncated) result
    pub result_hash: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl ActionRecord {
    pub fn new(
        seq: u64,
        action_type: &str,
        args: &Value,
        result: &str,
        success: bool,
        duration: Duration,
    ) -> Self {
        let args_canonical = canonical_json(args);
        Self {
            seq,
            action_type: action_type.to_string(),
            action_hash: fingerprint(&format!("{action_type}:{args_canonical}")),
            args_hash: fingerprint(&args_canonical),
            result_hash: fingerprint(truncate_chars(result, RESULT_HASH_CHARS)),
            success,
            timestamp: Utc::now(),
            duration,
        }
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// First 16 lowercase hex chars of the BLAKE3 digest.
pub fn fingerprint(content: &str) -> String {
    let hash = blake3::hash(content.as_bytes());
    hash.to_hex()[..FINGERPRINT_HEX_LEN].to_string()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Which window check fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    RepeatedAction,
    SimilarActions,
    RepeatedFailure,
    NoProgress,
    ResourceExhaustion,
}

impl std::fmt::Display for LoopType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RepeatedAction => write!(f, "repeated_action"),
            Self::SimilarActions => write!(f, "similar_actions"),
            Self::RepeatedFailure => write!(f, "repeated_failure"),
            Self::NoProgress => write!(f, "no_progress"),
            Self::ResourceExhaustion => write!(f, "resource_exhaustion"),
        }
    }
}

/// Policy response to a detected loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Continue,
    RetryDifferent,
    EscalateModel,
    RequestHelp,
    Abort,
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::RetryDifferent => write!(f, "retry_different"),
            Self::EscalateModel => write!(f, "escalate_model"),
            Self::RequestHelp => write!(f, "request_help"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// Immutable record of one detected loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoomLoopEvent {
    pub loop_type: LoopType,
    pub description: String,
    /// Action types of the last (up to) ten records, oldest first
    pub recent_actions: Vec<String>,
    pub recovery: RecoveryAction,
    /// Recovery attempts made before this event
    pub recovery_attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// Session statistics backed by the audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoomLoopStats {
    pub session_id: String,
    pub total_actions: usize,
    pub failed_actions: usize,
    pub success_rate: f64,
    pub unique_action_types: usize,
    pub slow_actions: usize,
    pub loops_detected: usize,
    pub recovery_attempts: u32,
    pub current_backoff_secs: f64,
    pub elapsed_secs: f64,
}

impl DoomLoopStats {
    pub fn summary(&self) -> String {
        format!(
            "actions={} failed={} success_rate={:.2} loops={} recoveries={} backoff={:.1}s",
            self.total_actions,
            self.failed_actions,
            self.success_rate,
            self.loops_detected,
            self.recovery_attempts,
            self.current_backoff_secs,
        )
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"z": [1, {"y": 2, "x": 3}], "c": null}});
        assert_eq!(
            canonical_json(&a),
            r#"{"a":{"c":null,"z":[1,{"x":3,"y":2}]},"b":1}"#
        );
    }

    #[test]
    fn test_fingerprint_is_key_order_independent() {
        let a = ActionRecord::new(
            1,
            "read",
            &json!({"path": "a", "mode": "r"}),
            "",
            true,
            Duration::ZERO,
        );
        let b = ActionRecord::new(
            2,
            "read",
            &json!({"mode": "r", "path": "a"}),
            "",
            true,
            Duration::ZERO,
        );
        assert_eq!(a.action_hash, b.action_hash);
        assert_eq!(a.args_hash, b.args_hash);
    }

    #[test]
    fn test_action_type_changes_action_hash_only() {
        let args = json!({"x": 1});
        let a = ActionRecord::new(1, "read", &args, "r", true, Duration::ZERO);
        let b = ActionRecord::new(2, "write", &args, "r", true, Duration::ZERO);
        assert_ne!(a.action_hash, b.action_hash);
        assert_eq!(a.args_hash, b.args_hash);
        assert_eq!(a.result_hash, b.result_hash);
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint("hello");
        assert_eq!(fp.len(), FINGERPRINT_HEX_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp, fingerprint("hello"));
    }

    #[test]
    fn test_result_truncated_before_hashing() {
        let long_a = format!("{}{}", "x".repeat(RESULT_HASH_CHARS), "tail-a");
        let long_b = format!("{}{}", "x".repeat(RESULT_HASH_CHARS), "tail-b");
        let a = ActionRecord::new(1, "t", &Value::Null, &long_a, true, Duration::ZERO);
        let b = ActionRecord::new(2, "t", &Value::Null, &long_b, true, Duration::ZERO);
        assert_eq!(a.result_hash, b.result_hash);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
