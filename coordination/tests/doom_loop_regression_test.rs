//! Regression tests for doom-loop detection
//!
//! Drives the detector through realistic agent action streams: edit/test
//! cycles, retry storms, stagnating reads, and slow sessions.

use coordination::doom_loop::{
    DetectorState, DoomLoopConfig, DoomLoopDetector, LoopType, RecoveryAction,
};
use serde_json::json;
use std::time::Duration;

fn session(config: DoomLoopConfig) -> DoomLoopDetector {
    let mut detector = DoomLoopDetector::new(config);
    detector.start_session();
    detector
}

#[test]
fn test_healthy_edit_test_cycle_never_loops() {
    let mut d = session(DoomLoopConfig::default());
    for i in 0..12 {
        let (ty, args, result) = match i % 3 {
            0 => ("read_file", json!({"path": format!("src/m{i}.rs")}), format!("contents {i}")),
            1 => ("edit_file", json!({"path": format!("src/m{i}.rs"), "line": i}), "ok".into()),
            _ => ("run_command", json!({"cmd": "cargo test", "run": i}), format!("{i} passed")),
        };
        assert!(
            !d.record_action(ty, args, &result, true, Duration::from_millis(200)),
            "false positive at action {i}"
        );
        if i % 3 == 1 {
            d.mark_progress(format!("edited m{i}"));
        }
    }
    assert!(d.events().is_empty());
    assert_eq!(d.state(), DetectorState::Active);
    assert_eq!(d.get_recovery_action(), RecoveryAction::Continue);
}

#[test]
fn test_two_identical_actions_are_not_a_loop() {
    let mut d = session(DoomLoopConfig::default());
    let args = json!({"path": "Cargo.toml"});
    assert!(!d.record_action("read_file", args.clone(), "x", true, Duration::ZERO));
    assert!(!d.record_action("read_file", args, "x", true, Duration::ZERO));
    assert!(!d.is_doom_loop());
}

#[test]
fn test_three_identical_actions_loop_with_reordered_keys() {
    let mut d = session(DoomLoopConfig::default());
    d.record_action("grep", json!({"q": "fn main", "dir": "src"}), "a", true, Duration::ZERO);
    d.record_action("grep", json!({"dir": "src", "q": "fn main"}), "b", true, Duration::ZERO);
    assert!(d.record_action("grep", json!({"q": "fn main", "dir": "src"}), "c", true, Duration::ZERO));
    assert_eq!(d.get_loop_type(), Some(LoopType::RepeatedAction));
    let event = &d.events()[0];
    assert_eq!(event.loop_type, LoopType::RepeatedAction);
    assert_eq!(event.recovery, RecoveryAction::RetryDifferent);
    assert_eq!(event.recent_actions, vec!["grep", "grep", "grep"]);
}

#[test]
fn test_retry_storm_escalates_through_policy_to_abort() {
    let mut d = session(DoomLoopConfig::default());
    let mut actions = Vec::new();
    for i in 0..3 {
        d.record_action("run_command", json!({"attempt": i}), "exit 1", false, Duration::ZERO);
    }
    assert_eq!(d.get_loop_type(), Some(LoopType::RepeatedFailure));

    loop {
        let action = d.get_recovery_action();
        actions.push(action);
        if action == RecoveryAction::Abort {
            break;
        }
        d.increment_recovery();
    }
    assert_eq!(
        actions,
        vec![
            RecoveryAction::RetryDifferent,
            RecoveryAction::EscalateModel,
            RecoveryAction::RequestHelp,
            RecoveryAction::Abort,
        ]
    );
}

#[test]
fn test_identical_results_without_progress_flag_stagnation() {
    let mut d = session(DoomLoopConfig::default());
    let types = ["list_files", "read_file", "grep", "glob", "read_file"];
    let mut detected_at = None;
    for (i, ty) in types.iter().enumerate() {
        if d.record_action(ty, json!({"n": i}), "no matches", true, Duration::ZERO) {
            detected_at = Some(i + 1);
            break;
        }
    }
    assert_eq!(detected_at, Some(5));
    assert_eq!(d.get_loop_type(), Some(LoopType::NoProgress));
}

#[test]
fn test_lower_similarity_threshold_detects_earlier_dominance() {
    let mut d = session(DoomLoopConfig {
        similarity_threshold: 0.6,
        ..Default::default()
    });
    // 3 of 5 are "grep" -> ceil(0.6 * 5) = 3
    d.record_action("grep", json!({"q": 1}), "r1", true, Duration::ZERO);
    d.record_action("read_file", json!({"p": 1}), "r2", true, Duration::ZERO);
    d.record_action("grep", json!({"q": 2}), "r3", true, Duration::ZERO);
    d.record_action("edit_file", json!({"p": 2}), "r4", true, Duration::ZERO);
    assert!(d.record_action("grep", json!({"q": 3}), "r5", true, Duration::ZERO));
    assert_eq!(d.get_loop_type(), Some(LoopType::SimilarActions));
}

#[test]
fn test_check_order_prefers_repeated_action() {
    let mut d = session(DoomLoopConfig::default());
    for _ in 0..3 {
        d.record_action("run_command", json!({"cmd": "make"}), "fail", false, Duration::ZERO);
    }
    // both RepeatedAction and RepeatedFailure fire; the first check wins
    assert_eq!(d.get_loop_type(), Some(LoopType::RepeatedAction));
}

#[tokio::test(start_paused = true)]
async fn test_session_time_budget_forces_abort() {
    let mut d = session(DoomLoopConfig {
        max_total_time: 10.0,
        ..Default::default()
    });
    d.record_action("read_file", json!({"p": 1}), "a", true, Duration::ZERO);
    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(d.record_action("read_file", json!({"p": 2}), "b", true, Duration::ZERO));
    assert_eq!(d.get_loop_type(), Some(LoopType::ResourceExhaustion));
    assert_eq!(d.get_recovery_action(), RecoveryAction::Abort);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_up_to_cap() {
    let mut d = session(DoomLoopConfig {
        max_backoff: 3.0,
        ..Default::default()
    });
    let start = tokio::time::Instant::now();
    let first = d.apply_backoff().await;
    let second = d.apply_backoff().await;
    let third = d.apply_backoff().await;
    assert_eq!(first, Duration::from_secs(1));
    assert_eq!(second, Duration::from_secs(2));
    assert_eq!(third, Duration::from_secs(3));
    assert!(start.elapsed() >= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_cancellation_mid_sleep() {
    let mut d = session(DoomLoopConfig {
        initial_backoff: 20.0,
        ..Default::default()
    });
    let token = tokio_util::sync::CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });
    let start = tokio::time::Instant::now();
    assert_eq!(d.apply_backoff_cancellable(&token).await, None);
    assert!(start.elapsed() < Duration::from_secs(20));
}

#[test]
fn test_stats_cover_whole_session_beyond_window() {
    let mut d = session(DoomLoopConfig::default());
    for i in 0..30 {
        d.record_action(
            &format!("tool_{}", i % 6),
            json!({"i": i}),
            &format!("result {i}"),
            i % 5 != 0,
            Duration::from_millis(50),
        );
    }
    let stats = d.get_stats();
    assert_eq!(stats.total_actions, 30);
    assert_eq!(stats.failed_actions, 6);
    assert_eq!(stats.unique_action_types, 6);
    assert_eq!(stats.slow_actions, 0);
    assert!(stats.summary().contains("actions=30"));
}
