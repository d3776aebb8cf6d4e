//! Block amplitude estimation and ambient threshold calibration
//!
//! Reduces 16-bit PCM blocks to a mean absolute magnitude, and turns the
//! magnitude accumulated over the ambient measurement window into a linear
//! detection threshold a fixed number of decibels above the room's noise.

/// Full-scale value of a signed 16-bit sample
pub const FULL_SCALE: f64 = 32767.0;

/// Margin between measured ambient loudness and the detection threshold
pub const THRESHOLD_MARGIN_DB: f64 = 16.0;

/// Sum of absolute sample values over a block
///
/// This is the un-normalised quantity the ambient accumulator adds up.
pub fn block_magnitude(block: &[i16]) -> f64 {
    block.iter().map(|&s| (s as i32).unsigned_abs() as f64).sum()
}

/// Mean absolute sample magnitude of a block
///
/// Returns 0.0 for an empty block.
///
/// # Example
/// ```
/// use latencytester_core::audio::amplitude::average_amplitude;
///
/// assert_eq!(average_amplitude(&[100, -100, 100, -100]), 100.0);
/// assert_eq!(average_amplitude(&[0; 64]), 0.0);
/// ```
pub fn average_amplitude(block: &[i16]) -> f64 {
    if block.is_empty() {
        return 0.0;
    }
    block_magnitude(block) / block.len() as f64
}

/// Convert a linear amplitude to dB relative to 16-bit full scale
pub fn to_dbfs(amplitude: f64) -> f64 {
    20.0 * (amplitude / FULL_SCALE).log10()
}

/// Threshold derived from an ambient measurement window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Ambient loudness in dBFS
    pub avg_db: f64,
    /// Linear PCM detection threshold
    pub threshold: f64,
}

impl Calibration {
    /// Calibrate from accumulated magnitude `sum` over `samples` samples
    ///
    /// Digital silence produces `-inf` dB and a zero threshold, so any
    /// non-zero input counts as the probe.
    ///
    /// # Example
    /// ```
    /// use latencytester_core::audio::amplitude::Calibration;
    ///
    /// let cal = Calibration::from_ambient(100.0 * 48000.0, 48000);
    /// // 16 dB above an ambient level of 100
    /// assert!((cal.threshold - 630.96).abs() < 0.1);
    /// ```
    pub fn from_ambient(sum: f64, samples: usize) -> Self {
        if samples == 0 {
            return Self {
                avg_db: f64::NEG_INFINITY,
                threshold: 0.0,
            };
        }
        let average = sum / samples as f64 / FULL_SCALE;
        let avg_db = 20.0 * average.log10();
        let reference = avg_db + THRESHOLD_MARGIN_DB;
        let threshold = 10f64.powf(reference / 20.0) * FULL_SCALE;

        Self { avg_db, threshold }
    }
}
