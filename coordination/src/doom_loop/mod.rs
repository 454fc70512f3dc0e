//! Doom-Loop Detection — guards the escalation loop against unproductive repetition
//!
//! Five ordered window checks over a ring buffer of hashed action records:
//!
//! | Order | Loop type            | Fires when                                        |
//! |-------|----------------------|---------------------------------------------------|
//! | 1     | `RepeatedAction`     | last N actions share one action hash              |
//! | 2     | `SimilarActions`     | one action type dominates the last M actions      |
//! | 3     | `RepeatedFailure`    | last K actions all failed                         |
//! | 4     | `NoProgress`         | no progress marker and ≤1 distinct result in P    |
//! | 5     | `ResourceExhaustion` | session wall clock exceeded                       |
//!
//! Detection is a side effect of recording; callers ask for a
//! [`RecoveryAction`] and drive backoff themselves.

pub mod config;
pub mod detector;
pub mod record;

pub use config::DoomLoopConfig;
pub use detector::{DetectorState, DoomLoopDetector, ProgressMarker};
pub use record::{
    canonical_json, fingerprint, ActionRecord, DoomLoopEvent, DoomLoopStats, LoopType,
    RecoveryAction,
};
