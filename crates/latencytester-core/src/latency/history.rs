//! Bounded per-run storage
//!
//! Both containers are allocated once when the run is set up and never grow
//! past their capacity, so pushing from the audio callback never allocates.

/// Number of input levels kept for diagnostics per listening phase
pub const DB_LOG_CAPACITY: usize = 512;

/// Summary over the recorded trials
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialSummary {
    pub max_ms: f32,
    pub min_ms: f32,
    pub mean_ms: f32,
}

impl TrialSummary {
    /// Ratio between the slowest and fastest trial
    pub fn spread(&self) -> f32 {
        self.max_ms / self.min_ms
    }
}

/// Round trip latency of each completed trial, in order
#[derive(Debug, Clone)]
pub struct TrialResults {
    results: Vec<f32>,
    capacity: usize,
}

impl TrialResults {
    /// Create storage for `capacity` trials
    pub fn new(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a trial result
    ///
    /// Returns `false` without storing anything once capacity is reached.
    pub fn push(&mut self, latency_ms: f32) -> bool {
        if self.is_full() {
            return false;
        }
        self.results.push(latency_ms);
        true
    }

    /// Max, min and mean over all recorded trials
    pub fn summary(&self) -> Option<TrialSummary> {
        if self.results.is_empty() {
            return None;
        }
        let mut max_ms = f32::MIN;
        let mut min_ms = f32::MAX;
        let mut sum = 0.0f32;
        for &r in &self.results {
            max_ms = max_ms.max(r);
            min_ms = min_ms.min(r);
            sum += r;
        }
        Some(TrialSummary {
            max_ms,
            min_ms,
            mean_ms: sum / self.results.len() as f32,
        })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.results.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Input levels (dBFS) seen while listening for the probe
///
/// Fills up to its capacity and then ignores further entries until cleared.
#[derive(Debug, Clone)]
pub struct DbLog {
    levels: Vec<f32>,
    capacity: usize,
}

impl DbLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            levels: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a level, returns `false` if the log is full
    pub fn push(&mut self, db: f32) -> bool {
        if self.levels.len() >= self.capacity {
            return false;
        }
        self.levels.push(db);
        true
    }

    /// The `n` most recent entries
    pub fn latest(&self, n: usize) -> &[f32] {
        let start = self.levels.len().saturating_sub(n);
        &self.levels[start..]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}

impl Default for DbLog {
    fn default() -> Self {
        Self::new(DB_LOG_CAPACITY)
    }
}

/// Format a slice of levels for a single debug line
pub(crate) fn format_levels(levels: &[f32]) -> String {
    levels
        .iter()
        .map(|db| format!("{:.1}", db))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_capacity() {
        let mut results = TrialResults::new(2);
        assert!(results.push(5.0));
        assert!(results.push(6.0));
        assert!(results.is_full());
        assert!(!results.push(7.0));
        assert_eq!(results.as_slice(), &[5.0, 6.0]);
    }

    #[test]
    fn test_summary() {
        let mut results = TrialResults::new(5);
        assert!(results.summary().is_none());

        for r in [4.0, 6.0, 5.0] {
            results.push(r);
        }
        let summary = results.summary().unwrap();
        assert_eq!(summary.max_ms, 6.0);
        assert_eq!(summary.min_ms, 4.0);
        assert!((summary.mean_ms - 5.0).abs() < 1e-6);
        assert!((summary.spread() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_single_result_has_unit_spread() {
        let mut results = TrialResults::new(5);
        results.push(5.0);
        assert_eq!(results.summary().unwrap().spread(), 1.0);
    }

    #[test]
    fn test_db_log_stops_at_capacity() {
        let mut log = DbLog::new(3);
        for db in [-60.0, -59.0, -58.0] {
            assert!(log.push(db));
        }
        assert!(!log.push(-10.0));
        assert_eq!(log.as_slice(), &[-60.0, -59.0, -58.0]);
    }

    #[test]
    fn test_db_log_windows() {
        let mut log = DbLog::new(10);
        for i in 0..5 {
            log.push(i as f32);
        }
        assert_eq!(log.latest(2), &[3.0, 4.0]);
        assert_eq!(log.latest(25), log.as_slice());

        log.clear();
        assert!(log.is_empty());
        assert!(log.latest(3).is_empty());
    }

    #[test]
    fn test_format_levels() {
        assert_eq!(format_levels(&[-50.0, -12.34]), "-50.0, -12.3");
    }
}
