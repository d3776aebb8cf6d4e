//! Audio processing module
//!
//! This module contains all audio-related functionality including:
//! - Block amplitude and ambient threshold calibration ([`amplitude`])
//! - Probe tone generation ([`tone`])
//! - Full-duplex device driver ([`engine`])

pub mod amplitude;
pub mod engine;
pub mod tone;
