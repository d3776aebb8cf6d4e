//! Latencytester Core - Round-trip audio latency measurement
//!
//! This library measures the acoustic round trip of an audio interface by
//! playing a probe tone through a speaker/microphone loopback and counting
//! samples until it comes back. The measurement is a real-time state machine
//! ([`latency::LatencyTest`]) driven once per audio period; [`audio::engine`]
//! wires it to a real device.

pub mod audio;
pub mod latency;

pub use audio::{engine::LatencyEngine, tone::SineGenerator};
pub use latency::{LatencyConfig, LatencyEvent, LatencyReport, LatencyState, LatencyTest};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");
