//! Latencytester - acoustic round-trip latency measurement
//!
//! This library re-exports the latency state machine, probe generation,
//! and duplex audio driver from `latencytester-core`.

pub use latencytester_core::audio;
pub use latencytester_core::latency;

pub use latencytester_core::{LatencyConfig, LatencyEngine, LatencyEvent, LatencyReport};
pub use latencytester_core::{LatencyState, LatencyTest, SineGenerator};
pub use latencytester_core::{BUILD_DATE, VERSION};
