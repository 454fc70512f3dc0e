//! Doom-Loop Detector — rolling action history with ordered window checks
//!
//! ```text
//! Idle ──start_session()──▶ Active ──check fires──▶ Looped
//!                             ▲                        │
//!                             └──increment_recovery()──┘
//! ```
//!
//! Detection reads a ring buffer sized to the largest window. A separate,
//! session-scoped audit log backs [`DoomLoopDetector::history`] and
//! [`DoomLoopDetector::get_stats`].

use super::config::{seconds, DoomLoopConfig};
use super::record::{ActionRecord, DoomLoopEvent, DoomLoopStats, LoopType, RecoveryAction};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Number of action types kept in an event's window.
const EVENT_WINDOW: usize = 10;

/// Lifecycle state of a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    Idle,
    Active,
    Looped,
}

/// A progress marker placed between actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressMarker {
    /// Sequence number of the last action recorded before the marker
    pub after_seq: u64,
    pub description: String,
}

/// Detects unproductive repetition in an agent's action stream.
#[derive(Debug)]
pub struct DoomLoopDetector {
    config: DoomLoopConfig,
    state: DetectorState,
    session_id: String,
    started: Option<Instant>,
    seq: u64,
    window: VecDeque<ActionRecord>,
    history: Vec<ActionRecord>,
    events: Vec<DoomLoopEvent>,
    progress: Vec<ProgressMarker>,
    recovery_attempts: u32,
    current_backoff: f64,
}

impl Default for DoomLoopDetector {
    fn default() -> Self {
        Self::new(DoomLoopConfig::default())
    }
}

impl DoomLoopDetector {
    pub fn new(config: DoomLoopConfig) -> Self {
        let capacity = config.window_capacity();
        let current_backoff = config.initial_backoff;
        Self {
            config,
            state: DetectorState::Idle,
            session_id: String::new(),
            started: None,
            seq: 0,
            window: VecDeque::with_capacity(capacity),
            history: Vec::new(),
            events: Vec::new(),
            progress: Vec::new(),
            recovery_attempts: 0,
            current_backoff,
        }
    }

    pub fn config(&self) -> &DoomLoopConfig {
        &self.config
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Begin a new session, clearing all prior state.
    pub fn start_session(&mut self) -> &str {
        self.session_id = uuid::Uuid::new_v4().to_string();
        self.started = Some(Instant::now());
        self.seq = 0;
        self.window.clear();
        self.history.clear();
        self.events.clear();
        self.progress.clear();
        self.recovery_attempts = 0;
        self.current_backoff = self.config.initial_backoff;
        self.state = DetectorState::Active;
        debug!(session_id = %self.session_id, "Doom-loop session started");
        &self.session_id
    }

    /// Time since `start_session()`
    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Record one action and re-evaluate the window checks.
    ///
    /// Returns whether a loop is now detected. Detection only logs an event;
    /// acting on it is the caller's job.
    pub fn record_action(
        &mut self,
        action_type: &str,
        args: Value,
        result: &str,
        success: bool,
        duration: Duration,
    ) -> bool {
        if self.state == DetectorState::Idle {
            self.start_session();
        }

        self.seq += 1;
        let record = ActionRecord::new(self.seq, action_type, &args, result, success, duration);

        if duration > self.config.max_time_per_action() {
            warn!(
                action_type,
                duration_ms = duration.as_millis() as u64,
                limit_secs = self.config.max_time_per_action,
                "Slow action"
            );
        }

        if self.window.len() == self.config.window_capacity() {
            self.window.pop_front();
        }
        self.window.push_back(record.clone());
        self.history.push(record);

        let Some(loop_type) = self.get_loop_type() else {
            return false;
        };

        let recovery = self.get_recovery_action();
        let event = DoomLoopEvent {
            loop_type,
            description: self.describe(loop_type),
            recent_actions: self.recent_action_types(EVENT_WINDOW),
            recovery,
            recovery_attempt: self.recovery_attempts,
            timestamp: Utc::now(),
        };
        warn!(
            session_id = %self.session_id,
            loop_type = %loop_type,
            recovery = %recovery,
            attempt = self.recovery_attempts,
            "Doom loop detected: {}",
            event.description
        );
        self.events.push(event);
        self.state = DetectorState::Looped;
        true
    }

    /// Note that meaningful progress happened since the last action.
    pub fn mark_progress(&mut self, description: impl Into<String>) {
        let description = description.into();
        debug!(after_seq = self.seq, %description, "Progress marked");
        self.progress.push(ProgressMarker {
            after_seq: self.seq,
            description,
        });
    }

    /// Whether any window check fires.
    pub fn is_doom_loop(&self) -> bool {
        self.get_loop_type().is_some()
    }

    /// First firing check, in priority order.
    pub fn get_loop_type(&self) -> Option<LoopType> {
        if self.window.len() < 2 {
            return None;
        }
        if self.check_repeated_action() {
            return Some(LoopType::RepeatedAction);
        }
        if self.check_similar_actions() {
            return Some(LoopType::SimilarActions);
        }
        if self.check_repeated_failure() {
            return Some(LoopType::RepeatedFailure);
        }
        if self.check_no_progress() {
            return Some(LoopType::NoProgress);
        }
        if self.check_resource_exhaustion() {
            return Some(LoopType::ResourceExhaustion);
        }
        None
    }

    /// Policy response for the current state.
    pub fn get_recovery_action(&self) -> RecoveryAction {
        let Some(loop_type) = self.get_loop_type() else {
            return RecoveryAction::Continue;
        };
        if !self.config.enable_auto_recovery {
            return RecoveryAction::RequestHelp;
        }
        if loop_type == LoopType::ResourceExhaustion
            || self.recovery_attempts >= self.config.max_recovery_attempts
        {
            return RecoveryAction::Abort;
        }
        match self.recovery_attempts {
            0 => RecoveryAction::RetryDifferent,
            1 if self.config.escalate_on_loop => RecoveryAction::EscalateModel,
            _ => RecoveryAction::RequestHelp,
        }
    }

    /// Count a recovery attempt. Returns whether attempts remain.
    pub fn increment_recovery(&mut self) -> bool {
        self.recovery_attempts += 1;
        if self.state == DetectorState::Looped {
            self.state = DetectorState::Active;
        }
        let remaining = self.recovery_attempts < self.config.max_recovery_attempts;
        info!(
            attempt = self.recovery_attempts,
            max = self.config.max_recovery_attempts,
            remaining,
            "Doom-loop recovery attempt"
        );
        remaining
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.recovery_attempts
    }

    // ── Backoff ────────────────────────────────────────────────────────

    /// Next delay, capped at `max_backoff`; advances the schedule.
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.current_backoff.min(self.config.max_backoff);
        self.current_backoff *= self.config.backoff_multiplier;
        seconds(delay)
    }

    /// Sleep for the next backoff delay. Returns the delay slept.
    pub async fn apply_backoff(&mut self) -> Duration {
        let delay = self.next_backoff();
        debug!(delay_ms = delay.as_millis() as u64, "Applying backoff");
        tokio::time::sleep(delay).await;
        delay
    }

    /// Like [`apply_backoff`](Self::apply_backoff) but returns `None` early
    /// when the token is cancelled.
    pub async fn apply_backoff_cancellable(
        &mut self,
        token: &CancellationToken,
    ) -> Option<Duration> {
        let delay = self.next_backoff();
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Backoff cancelled");
                None
            }
            _ = tokio::time::sleep(delay) => Some(delay),
        }
    }

    pub fn reset_backoff(&mut self) {
        self.current_backoff = self.config.initial_backoff;
    }

    pub fn current_backoff(&self) -> Duration {
        seconds(self.current_backoff.min(self.config.max_backoff))
    }

    // ── Audit trail ────────────────────────────────────────────────────

    /// Every action recorded this session
    pub fn history(&self) -> &[ActionRecord] {
        &self.history
    }

    /// Every loop detected this session
    pub fn events(&self) -> &[DoomLoopEvent] {
        &self.events
    }

    pub fn progress_markers(&self) -> &[ProgressMarker] {
        &self.progress
    }

    /// Action types of the last `n` records, oldest first
    pub fn recent_action_types(&self, n: usize) -> Vec<String> {
        let start = self.history.len().saturating_sub(n);
        self.history[start..]
            .iter()
            .map(|r| r.action_type.clone())
            .collect()
    }

    pub fn get_stats(&self) -> DoomLoopStats {
        let total = self.history.len();
        let failed = self.history.iter().filter(|r| !r.success).count();
        let unique: HashSet<&str> = self.history.iter().map(|r| r.action_type.as_str()).collect();
        let slow_limit = self.config.max_time_per_action();
        DoomLoopStats {
            session_id: self.session_id.clone(),
            total_actions: total,
            failed_actions: failed,
            success_rate: if total == 0 {
                0.0
            } else {
                (total - failed) as f64 / total as f64
            },
            unique_action_types: unique.len(),
            slow_actions: self.history.iter().filter(|r| r.duration > slow_limit).count(),
            loops_detected: self.events.len(),
            recovery_attempts: self.recovery_attempts,
            current_backoff_secs: self.current_backoff.min(self.config.max_backoff),
            elapsed_secs: self.elapsed().as_secs_f64(),
        }
    }

    // ── Checks ─────────────────────────────────────────────────────────

    fn tail(&self, n: usize) -> Option<impl Iterator<Item = &ActionRecord>> {
        (n > 0 && self.window.len() >= n).then(|| self.window.iter().skip(self.window.len() - n))
    }

    fn check_repeated_action(&self) -> bool {
        let Some(mut tail) = self.tail(self.config.max_identical_actions) else {
            return false;
        };
        let Some(first) = tail.next() else {
            return false;
        };
        tail.all(|r| r.action_hash == first.action_hash)
    }

    fn check_similar_actions(&self) -> bool {
        let Some(tail) = self.tail(self.config.max_similar_actions) else {
            return false;
        };
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for r in tail {
            *counts.entry(r.action_type.as_str()).or_default() += 1;
        }
        counts.values().copied().max().unwrap_or(0) >= self.config.similar_required()
    }

    fn check_repeated_failure(&self) -> bool {
        self.tail(self.config.max_consecutive_failures)
            .map(|mut tail| tail.all(|r| !r.success))
            .unwrap_or(false)
    }

    fn check_no_progress(&self) -> bool {
        let Some(tail) = self.tail(self.config.max_no_progress_steps) else {
            return false;
        };
        let tail: Vec<&ActionRecord> = tail.collect();
        let first_seq = tail.first().map(|r| r.seq).unwrap_or(0);
        let progressed = self
            .progress
            .iter()
            .any(|m| m.after_seq + 1 >= first_seq);
        if progressed {
            return false;
        }
        let distinct: HashSet<&str> = tail.iter().map(|r| r.result_hash.as_str()).collect();
        distinct.len() <= 1
    }

    fn check_resource_exhaustion(&self) -> bool {
        self.started.is_some() && self.elapsed() > self.config.max_total_time()
    }

    fn describe(&self, loop_type: LoopType) -> String {
        match loop_type {
            LoopType::RepeatedAction => format!(
                "last {} actions were identical",
                self.config.max_identical_actions
            ),
            LoopType::SimilarActions => format!(
                "one action type dominates the last {} actions",
                self.config.max_similar_actions
            ),
            LoopType::RepeatedFailure => format!(
                "last {} actions failed",
                self.config.max_consecutive_failures
            ),
            LoopType::NoProgress => format!(
                "no progress over the last {} actions",
                self.config.max_no_progress_steps
            ),
            LoopType::ResourceExhaustion => format!(
                "session exceeded {:.0}s",
                self.config.max_total_time
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector() -> DoomLoopDetector {
        let mut d = DoomLoopDetector::default();
        d.start_session();
        d
    }

    fn record(d: &mut DoomLoopDetector, ty: &str, args: Value, result: &str, ok: bool) -> bool {
        d.record_action(ty, args, result, ok, Duration::from_millis(10))
    }

    #[test]
    fn test_starts_idle_then_active() {
        let mut d = DoomLoopDetector::default();
        assert_eq!(d.state(), DetectorState::Idle);
        d.start_session();
        assert_eq!(d.state(), DetectorState::Active);
        assert!(!d.session_id().is_empty());
    }

    #[test]
    fn test_record_in_idle_starts_session() {
        let mut d = DoomLoopDetector::default();
        record(&mut d, "read", json!({}), "ok", true);
        assert_eq!(d.state(), DetectorState::Active);
        assert_eq!(d.history().len(), 1);
    }

    #[test]
    fn test_repeated_action() {
        let mut d = detector();
        assert!(!record(&mut d, "read", json!({"path": "a"}), "x", true));
        assert!(!record(&mut d, "read", json!({"path": "a"}), "y", true));
        assert!(!d.is_doom_loop());
        assert!(record(&mut d, "read", json!({"path": "a"}), "z", true));
        assert_eq!(d.get_loop_type(), Some(LoopType::RepeatedAction));
        assert_eq!(d.state(), DetectorState::Looped);
        assert_eq!(d.events().len(), 1);
    }

    #[test]
    fn test_repeated_failure_with_distinct_args() {
        let mut d = detector();
        record(&mut d, "run", json!({"cmd": 1}), "e1", false);
        record(&mut d, "run", json!({"cmd": 2}), "e2", false);
        assert!(record(&mut d, "run", json!({"cmd": 3}), "e3", false));
        assert_eq!(d.get_loop_type(), Some(LoopType::RepeatedFailure));
    }

    #[test]
    fn test_similar_actions() {
        let mut d = detector();
        for i in 0..4 {
            assert!(!record(&mut d, "grep", json!({"q": i}), &format!("r{i}"), true));
        }
        assert!(record(&mut d, "grep", json!({"q": 4}), "r4", true));
        assert_eq!(d.get_loop_type(), Some(LoopType::SimilarActions));
    }

    #[test]
    fn test_no_progress_with_identical_results() {
        let mut d = detector();
        let types = ["a", "b", "c", "d", "e"];
        for (i, ty) in types.iter().enumerate() {
            let looped = record(&mut d, ty, json!({"i": i}), "same", true);
            assert_eq!(looped, i == 4, "unexpected detection at record {}", i + 1);
        }
        assert_eq!(d.get_loop_type(), Some(LoopType::NoProgress));
    }

    #[test]
    fn test_progress_marker_suppresses_no_progress() {
        let mut d = detector();
        for (i, ty) in ["a", "b", "c"].iter().enumerate() {
            record(&mut d, ty, json!({"i": i}), "same", true);
        }
        d.mark_progress("wrote file");
        record(&mut d, "d", json!({}), "same", true);
        assert!(!record(&mut d, "e", json!({}), "same", true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_exhaustion_aborts() {
        let mut d = detector();
        record(&mut d, "a", json!({}), "1", true);
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(record(&mut d, "b", json!({}), "2", true));
        assert_eq!(d.get_loop_type(), Some(LoopType::ResourceExhaustion));
        assert_eq!(d.get_recovery_action(), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_policy_sequence() {
        let mut d = detector();
        for _ in 0..3 {
            record(&mut d, "read", json!({"p": 1}), "x", true);
        }
        assert_eq!(d.get_recovery_action(), RecoveryAction::RetryDifferent);
        assert!(d.increment_recovery());
        assert_eq!(d.state(), DetectorState::Active);
        assert_eq!(d.get_recovery_action(), RecoveryAction::EscalateModel);
        assert!(d.increment_recovery());
        assert_eq!(d.get_recovery_action(), RecoveryAction::RequestHelp);
        assert!(!d.increment_recovery());
        assert_eq!(d.get_recovery_action(), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_without_escalation() {
        let mut d = DoomLoopDetector::new(DoomLoopConfig {
            escalate_on_loop: false,
            ..Default::default()
        });
        d.start_session();
        for _ in 0..3 {
            record(&mut d, "read", json!({}), "x", true);
        }
        d.increment_recovery();
        assert_eq!(d.get_recovery_action(), RecoveryAction::RequestHelp);
    }

    #[test]
    fn test_recovery_disabled_requests_help() {
        let mut d = DoomLoopDetector::new(DoomLoopConfig {
            enable_auto_recovery: false,
            ..Default::default()
        });
        d.start_session();
        assert_eq!(d.get_recovery_action(), RecoveryAction::Continue);
        for _ in 0..3 {
            record(&mut d, "read", json!({}), "x", true);
        }
        assert_eq!(d.get_recovery_action(), RecoveryAction::RequestHelp);
    }

    #[test]
    fn test_backoff_schedule_is_capped() {
        let mut d = DoomLoopDetector::new(DoomLoopConfig {
            initial_backoff: 10.0,
            max_backoff: 25.0,
            ..Default::default()
        });
        assert_eq!(d.next_backoff(), Duration::from_secs(10));
        assert_eq!(d.next_backoff(), Duration::from_secs(20));
        assert_eq!(d.next_backoff(), Duration::from_secs(25));
        d.reset_backoff();
        assert_eq!(d.next_backoff(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_backoff_sleeps() {
        let mut d = detector();
        let start = Instant::now();
        assert_eq!(d.apply_backoff().await, Duration::from_secs(1));
        assert_eq!(d.apply_backoff().await, Duration::from_secs(2));
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_backoff_returns_early() {
        let mut d = detector();
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(d.apply_backoff_cancellable(&token).await, None);
    }

    #[test]
    fn test_ring_buffer_is_bounded_but_history_is_not() {
        let mut d = detector();
        for i in 0..20 {
            record(&mut d, &format!("t{}", i % 7), json!({"i": i}), &format!("r{i}"), true);
        }
        assert_eq!(d.window.len(), d.config().window_capacity());
        assert_eq!(d.history().len(), 20);
    }

    #[test]
    fn test_stats() {
        let mut d = detector();
        record(&mut d, "a", json!({}), "1", true);
        record(&mut d, "b", json!({}), "2", false);
        d.record_action("c", json!({}), "3", true, Duration::from_secs(61));
        let stats = d.get_stats();
        assert_eq!(stats.total_actions, 3);
        assert_eq!(stats.failed_actions, 1);
        assert_eq!(stats.unique_action_types, 3);
        assert_eq!(stats.slow_actions, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.session_id, d.session_id());
    }

    #[test]
    fn test_start_session_clears_state() {
        let mut d = detector();
        for _ in 0..3 {
            record(&mut d, "read", json!({}), "x", true);
        }
        d.increment_recovery();
        d.next_backoff();
        let old = d.session_id().to_string();
        d.start_session();
        assert!(d.history().is_empty());
        assert!(d.events().is_empty());
        assert_eq!(d.recovery_attempts(), 0);
        assert_eq!(d.current_backoff(), Duration::from_secs(1));
        assert_ne!(d.session_id(), old);
    }

    #[test]
    fn test_unvalidated_huge_limits_do_not_panic() {
        let mut d = DoomLoopDetector::new(DoomLoopConfig {
            max_total_time: 1e20,
            max_time_per_action: 1e20,
            initial_backoff: 1e20,
            max_backoff: 1e20,
            ..Default::default()
        });
        d.start_session();
        assert!(!record(&mut d, "read", json!({"path": "a"}), "x", true));
        assert!(!record(&mut d, "read", json!({"path": "b"}), "y", true));
        assert_eq!(d.next_backoff(), Duration::MAX);
    }
}
