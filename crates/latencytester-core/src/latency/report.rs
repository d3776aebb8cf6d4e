//! Outcomes and errors of a latency run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::LatencyState;

/// Unrecoverable configuration or stream-shape errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LatencyError {
    #[error("Input block has {actual} frames, expected period size {expected}")]
    PeriodSizeMismatch { expected: usize, actual: usize },

    #[error("Only mono streams are supported, got {0} channels")]
    UnsupportedChannels(u16),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why a run ended in [`LatencyState::CompleteFailure`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Too many trials where the probe never crossed the threshold
    SignalNotDetected,
    /// Recorded trials disagree by more than a factor of two
    Inconsistent { max_ms: f32, min_ms: f32 },
    /// The run budget elapsed before a terminal state was reached
    TimeLimitExceeded,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignalNotDetected => {
                write!(f, "Could not detect signal. Too much background noise?")
            }
            Self::Inconsistent { max_ms, min_ms } => write!(
                f,
                "Inconsistent round trip latency: max {:.2}ms / min {:.2}ms > 2",
                max_ms, min_ms
            ),
            Self::TimeLimitExceeded => write!(f, "Latency test did not finish in time"),
        }
    }
}

/// Diagnostic produced by a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum LatencyEvent {
    /// One trial recorded a round trip
    TrialMeasured { trial: usize, latency_ms: f32 },
    /// All trials recorded and consistent
    Completed { latency_ms: f32 },
    /// The run was aborted
    Failed(FailureReason),
}

impl LatencyEvent {
    /// Whether this event belongs on the error stream
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Events emitted by a single call into the state machine
///
/// A call yields at most two events (a trial result followed by the run
/// outcome), stored inline so the audio callback never allocates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Events {
    slots: [Option<LatencyEvent>; 2],
}

impl Events {
    pub(crate) fn push(&mut self, event: LatencyEvent) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots[0].is_none()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LatencyEvent> {
        self.slots.iter().flatten()
    }

    /// The run outcome, if this call ended the run
    pub fn outcome(&self) -> Option<&LatencyEvent> {
        self.iter()
            .find(|e| matches!(e, LatencyEvent::Completed { .. } | LatencyEvent::Failed(_)))
    }
}

impl IntoIterator for Events {
    type Item = LatencyEvent;
    type IntoIter = std::iter::Flatten<std::array::IntoIter<Option<LatencyEvent>, 2>>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter().flatten()
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyReport {
    /// Terminal state of the run
    pub state: LatencyState,
    /// Per-trial round trip latencies in ms
    pub trials_ms: Vec<f32>,
    /// Mean latency, present only on success
    pub final_ms: Option<f32>,
    /// Failure cause, present only on failure
    pub failure: Option<FailureReason>,
    /// Ambient level of the last calibration in dBFS, `None` before the
    /// first calibration or on digital silence
    pub ambient_db: Option<f64>,
    /// Detection threshold of the last calibration
    pub threshold: f64,
    /// When the report was taken
    pub finished_at: DateTime<Utc>,
}
