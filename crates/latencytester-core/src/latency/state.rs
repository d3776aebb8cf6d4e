//! Lifecycle states of a latency run

use serde::{Deserialize, Serialize};

use super::report::{Events, LatencyEvent};

/// Phase of the round-trip latency test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatencyState {
    /// Discarding device warm-up before measuring ambient noise
    SkipLead,
    /// Accumulating ambient loudness for the threshold
    Measure,
    /// Playing the probe and listening for it to return
    PlayAndListen,
    /// Letting the room and circuit settle before the next trial
    Waiting,
    /// All trials recorded and consistent
    CompleteSuccess,
    /// Run aborted
    CompleteFailure,
}

impl LatencyState {
    /// Terminal states accept no further input
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::CompleteSuccess | Self::CompleteFailure)
    }
}

/// Result of one transition function
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Step {
    pub next: LatencyState,
    pub events: Events,
}

impl Step {
    pub fn to(next: LatencyState) -> Self {
        Self {
            next,
            events: Events::default(),
        }
    }

    pub fn with(mut self, event: LatencyEvent) -> Self {
        self.events.push(event);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(LatencyState::CompleteSuccess.is_terminal());
        assert!(LatencyState::CompleteFailure.is_terminal());
        assert!(!LatencyState::SkipLead.is_terminal());
        assert!(!LatencyState::Waiting.is_terminal());
    }
}
