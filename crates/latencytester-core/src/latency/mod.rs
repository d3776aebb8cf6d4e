//! Round-trip latency measurement
//!
//! - Run configuration ([`config`])
//! - Lifecycle states ([`state`])
//! - The per-period state machine ([`roundtrip`])
//! - Bounded result and diagnostic storage ([`history`])
//! - Events, outcomes, and errors ([`report`])

pub mod config;
pub mod history;
pub mod report;
pub mod roundtrip;
pub mod state;

pub use config::LatencyConfig;
pub use report::{Events, FailureReason, LatencyError, LatencyEvent, LatencyReport};
pub use roundtrip::{LatencyTest, Playback};
pub use state::LatencyState;

/// Initial ceiling on how long to listen for the probe, in seconds
pub const MAX_WAIT_SECONDS: usize = 1;

/// Listening ceiling after a missed trial, in periods
pub const RETRY_WAIT_PERIODS: usize = 10;

/// Settling margin subtracted from the ceiling after a detection, in periods
pub const SETTLE_PERIODS: usize = 10;

/// Pause between trials, in seconds
pub const WAITING_SECONDS: usize = 3;

/// Playback keeps going this long before it may stop after capture ended
pub const PLAYBACK_DRAIN_SECONDS: u64 = 2;

/// Largest accepted ratio between the slowest and fastest trial
pub const MAX_SPREAD: f32 = 2.0;
