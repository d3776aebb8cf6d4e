//! Probe tone generation
//!
//! The latency test plays a continuous sine tone while it listens for the
//! tone to come back through the loopback path.

use std::f64::consts::TAU;

/// Default probe frequency in Hz
pub const DEFAULT_TONE_FREQUENCY: f64 = 997.0;

/// Default probe amplitude (-6dB for headroom)
pub const DEFAULT_TONE_AMPLITUDE: f64 = 0.5;

/// Source of the probe waveform written by the output scheduler
pub trait ProbeSource {
    /// Fill the block with the next probe samples
    fn fill(&mut self, block: &mut [i16]);
}

/// Phase-continuous sine generator producing 16-bit samples
///
/// # Example
/// ```
/// use latencytester_core::audio::tone::{ProbeSource, SineGenerator};
///
/// let mut gen = SineGenerator::new(48000, 997.0, 0.5);
/// let mut block = [0i16; 64];
/// gen.fill(&mut block);
/// assert!(block.iter().any(|&s| s != 0));
/// ```
#[derive(Debug, Clone)]
pub struct SineGenerator {
    sample_rate: u32,
    frequency: f64,
    amplitude: f64,
    /// Current phase in cycles (0.0..1.0)
    phase: f64,
}

impl SineGenerator {
    /// Create a new generator
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate in Hz
    /// * `frequency` - Tone frequency in Hz
    /// * `amplitude` - Amplitude from 0.0 to 1.0 of full scale
    pub fn new(sample_rate: u32, frequency: f64, amplitude: f64) -> Self {
        Self {
            sample_rate,
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
        }
    }

    /// Get the next sample
    pub fn next_sample(&mut self) -> i16 {
        let value = (self.phase * TAU).sin() * self.amplitude * 32767.0;
        self.phase = (self.phase + self.frequency / self.sample_rate as f64).fract();
        value.round() as i16
    }

    /// Restart the tone at phase zero
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl ProbeSource for SineGenerator {
    fn fill(&mut self, block: &mut [i16]) {
        for sample in block.iter_mut() {
            *sample = self.next_sample();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero_crossing() {
        let mut gen = SineGenerator::new(48000, 997.0, 0.5);
        assert_eq!(gen.next_sample(), 0);
        assert!(gen.next_sample() > 0, "Sine should rise after phase zero");
    }

    #[test]
    fn test_peak_respects_amplitude() {
        let mut gen = SineGenerator::new(48000, 997.0, 0.25);
        let mut block = vec![0i16; 4800];
        gen.fill(&mut block);

        let peak = block.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak <= 8192, "Peak {} exceeds amplitude", peak);
        assert!(peak > 8000, "Peak {} should approach amplitude", peak);
    }

    #[test]
    fn test_amplitude_is_clamped() {
        let gen = SineGenerator::new(48000, 997.0, 3.0);
        assert_eq!(gen.amplitude(), 1.0);
    }

    #[test]
    fn test_phase_continuous_across_blocks() {
        let mut split = SineGenerator::new(44100, 440.0, 0.5);
        let mut whole = SineGenerator::new(44100, 440.0, 0.5);

        let mut a = [0i16; 100];
        let mut b = [0i16; 100];
        split.fill(&mut a);
        split.fill(&mut b);

        let mut c = [0i16; 200];
        whole.fill(&mut c);

        assert_eq!(&c[..100], &a[..]);
        assert_eq!(&c[100..], &b[..]);
    }

    #[test]
    fn test_zero_crossings_match_frequency() {
        let mut gen = SineGenerator::new(48000, 1000.0, 0.5);
        let mut block = vec![0i16; 48000];
        gen.fill(&mut block);

        let rising = block
            .windows(2)
            .filter(|w| w[0] <= 0 && w[1] > 0)
            .count();
        assert!((999..=1001).contains(&rising), "Got {} cycles", rising);
    }

    #[test]
    fn test_reset() {
        let mut gen = SineGenerator::new(48000, 997.0, 0.5);
        for _ in 0..123 {
            gen.next_sample();
        }
        gen.reset();
        assert_eq!(gen.next_sample(), 0);
    }
}
