//! Round-trip latency state machine
//!
//! [`LatencyTest`] is driven once per audio period from both sides of a
//! full-duplex stream:
//! - [`LatencyTest::handle_input`] consumes one captured period and advances
//!   the lifecycle (lead-in skip, ambient measurement, listening, waiting)
//! - [`LatencyTest::handle_output`] decides whether the next played period
//!   is silence or probe tone
//!
//! One trial works like this:
//! 1. Listen to the room for one second and measure its average loudness.
//! 2. Set a threshold 16 dB above that loudness.
//! 3. Play the probe and count captured samples.
//! 4. Stop counting at the first sample above the threshold; the count is
//!    the round trip.
//!
//! Trials are repeated with a settling pause in between, and the run only
//! succeeds when all of them agree within a factor of two.

use tracing::{debug, error, info, trace};

use super::config::LatencyConfig;
use super::history::{format_levels, DbLog, TrialResults};
use super::report::{Events, FailureReason, LatencyError, LatencyEvent, LatencyReport};
use super::state::{LatencyState, Step};
use super::{
    MAX_SPREAD, MAX_WAIT_SECONDS, PLAYBACK_DRAIN_SECONDS, RETRY_WAIT_PERIODS, SETTLE_PERIODS,
    WAITING_SECONDS,
};
use crate::audio::amplitude::{average_amplitude, block_magnitude, to_dbfs, Calibration};
use crate::audio::tone::ProbeSource;

/// Levels dumped to the debug log after each recorded trial
const DB_DUMP_LATEST: usize = 25;

/// What the output side should do after a period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    /// Keep the stream running
    Continue,
    /// Capture has ended; stop playback and report this state
    Finished(LatencyState),
}

/// Caller-owned context of one latency run
///
/// # Example
/// ```
/// use latencytester_core::latency::{LatencyConfig, LatencyState, LatencyTest};
///
/// let config = LatencyConfig {
///     period_size: 64,
///     ..Default::default()
/// };
/// let mut test = LatencyTest::new(config).unwrap();
/// assert_eq!(test.state(), LatencyState::SkipLead);
///
/// let events = test.handle_input(&[0i16; 64]).unwrap();
/// assert!(events.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct LatencyTest {
    config: LatencyConfig,
    state: LatencyState,
    /// 1-based index of the current trial
    iteration: usize,
    /// Sample counter, meaning depends on the state
    samples: usize,
    /// Lead-in length, whole periods
    measure_skip_samples: usize,
    /// Ambient magnitude accumulator
    sum: f64,
    calibration: Calibration,
    /// Give up listening for the probe after this many samples
    wait_samples: usize,
    /// Missed trials over the whole run
    errors: usize,
    results: TrialResults,
    final_result: Option<f32>,
    failure: Option<FailureReason>,
    /// Output periods still forced silent
    silence_artifact: u32,
    test_db: DbLog,
    is_capturing: bool,
    latest_playback_state: LatencyState,
    periods_played: u64,
    frames_captured: u64,
}

impl LatencyTest {
    /// Set up a run
    ///
    /// Fails if the configuration is invalid, including any channel count
    /// other than one.
    pub fn new(config: LatencyConfig) -> Result<Self, LatencyError> {
        config.validate()?;

        let state = LatencyState::SkipLead;
        Ok(Self {
            measure_skip_samples: config.lead_in_samples(),
            results: TrialResults::new(config.trials),
            state,
            iteration: 1,
            samples: 0,
            sum: 0.0,
            calibration: Calibration {
                avg_db: f64::NEG_INFINITY,
                threshold: 0.0,
            },
            wait_samples: 0,
            errors: 0,
            final_result: None,
            failure: None,
            silence_artifact: 0,
            test_db: DbLog::default(),
            is_capturing: false,
            latest_playback_state: state,
            periods_played: 0,
            frames_captured: 0,
            config,
        })
    }

    /// Consume one captured period
    ///
    /// The block must hold exactly `period_size` mono frames; anything else
    /// is a fatal stream-shape error. Calls after the run has finished are
    /// ignored.
    pub fn handle_input(&mut self, block: &[i16]) -> Result<Events, LatencyError> {
        if block.len() != self.config.period_size {
            return Err(LatencyError::PeriodSizeMismatch {
                expected: self.config.period_size,
                actual: block.len(),
            });
        }
        if self.state.is_terminal() {
            return Ok(Events::default());
        }

        self.is_capturing = true;
        self.frames_captured += block.len() as u64;

        let step = match self.state {
            LatencyState::SkipLead => self.skip_lead(block),
            LatencyState::Measure => self.measure(block),
            LatencyState::PlayAndListen => self.play_and_listen(block),
            LatencyState::Waiting => self.wait(block),
            LatencyState::CompleteSuccess | LatencyState::CompleteFailure => {
                return Ok(Events::default())
            }
        };

        Ok(self.apply(step))
    }

    /// Produce one period of output
    ///
    /// While listening the block gets the probe, except for the first
    /// `silence_guard_periods` periods which stay silent so the tail of the
    /// previous probe cannot re-trigger detection. Every other state plays
    /// silence. Once capture has stopped and more than two seconds were
    /// played, the block is left untouched and [`Playback::Finished`] is
    /// returned.
    pub fn handle_output<P: ProbeSource + ?Sized>(
        &mut self,
        block: &mut [i16],
        probe: &mut P,
    ) -> Playback {
        let played = self.periods_played * block.len() as u64;
        if played > PLAYBACK_DRAIN_SECONDS * self.config.sample_rate as u64 && !self.is_capturing
        {
            return Playback::Finished(self.state);
        }

        if self.latest_playback_state != self.state {
            debug!(
                from = ?self.latest_playback_state,
                to = ?self.state,
                "playback_state_changed"
            );
        }

        if self.state == LatencyState::PlayAndListen && self.silence_artifact == 0 {
            probe.fill(block);
        } else {
            if self.state == LatencyState::PlayAndListen {
                self.silence_artifact -= 1;
            }
            block.fill(0);
        }

        self.latest_playback_state = self.state;
        self.periods_played += 1;
        Playback::Continue
    }

    /// Abort a run that has not finished, e.g. when the driver's time budget
    /// runs out
    pub fn abort(&mut self, reason: FailureReason) -> Option<LatencyEvent> {
        if self.state.is_terminal() {
            return None;
        }
        error!(reason = %reason, "Latency test aborted");
        let step = Step::to(LatencyState::CompleteFailure).with(LatencyEvent::Failed(reason));
        self.apply(step).into_iter().next()
    }

    fn apply(&mut self, step: Step) -> Events {
        if step.next != self.state {
            trace!(from = ?self.state, to = ?step.next, trial = self.iteration, "state_transition");
            if step.next == LatencyState::Waiting {
                self.samples = 0;
            }
            if step.next.is_terminal() {
                self.is_capturing = false;
            }
        }
        for event in step.events.iter() {
            if let LatencyEvent::Failed(reason) = event {
                self.failure = Some(*reason);
            }
        }
        self.state = step.next;
        step.events
    }

    fn skip_lead(&mut self, block: &[i16]) -> Step {
        if self.measure_skip_samples > 0 {
            self.samples += block.len();
            if self.samples >= self.measure_skip_samples {
                debug!(
                    skipped = self.samples,
                    frames_captured = self.frames_captured,
                    "lead_in_skipped"
                );
                // sum is already zero here, WAITING and MEASURE both clear it
                self.samples = 0;
                return Step::to(LatencyState::Measure);
            }
            return Step::to(LatencyState::SkipLead);
        }

        // No lead-in: this block already belongs to the measurement
        self.samples = 0;
        self.measure(block)
    }

    fn measure(&mut self, block: &[i16]) -> Step {
        self.sum += block_magnitude(block);
        self.samples += block.len();

        let window = (self.config.sample_rate as usize).saturating_sub(self.measure_skip_samples);
        if self.samples < window {
            return Step::to(LatencyState::Measure);
        }

        self.calibration = Calibration::from_ambient(self.sum, self.samples);
        debug!(
            samples = self.samples,
            sum = self.sum,
            avg_db = self.calibration.avg_db,
            threshold = self.calibration.threshold,
            "ambient_measured"
        );

        self.samples = 0;
        self.sum = 0.0;
        self.wait_samples = self.config.sample_rate as usize * MAX_WAIT_SECONDS;
        self.silence_artifact = self.config.silence_guard_periods;
        self.test_db.clear();
        Step::to(LatencyState::PlayAndListen)
    }

    fn play_and_listen(&mut self, block: &[i16]) -> Step {
        let frames = block.len();
        let trial = self.iteration;
        let span = self.samples + frames;
        let threshold = self.calibration.threshold;
        let settle = self.config.period_size * SETTLE_PERIODS;

        let average = average_amplitude(block);
        self.test_db.push(to_dbfs(average) as f32);

        if average <= threshold {
            self.samples += frames;
            if self.samples <= self.wait_samples {
                return Step::to(LatencyState::PlayAndListen);
            }

            self.errors += 1;
            if self.errors > self.config.trials {
                error!(
                    trial,
                    errors = self.errors,
                    "Could not detect signal. Too much background noise?"
                );
                return Step::to(LatencyState::CompleteFailure)
                    .with(LatencyEvent::Failed(FailureReason::SignalNotDetected));
            }

            self.wait_samples = self.config.period_size * RETRY_WAIT_PERIODS;
            debug!(
                trial,
                errors = self.errors,
                wait_samples = self.wait_samples,
                levels = %format_levels(self.test_db.as_slice()),
                "probe_missed"
            );
            return Step::to(LatencyState::Waiting);
        }

        let onset = block
            .iter()
            .position(|&s| f64::from(s) > threshold)
            .unwrap_or(frames);
        self.samples += onset;

        // The probe cannot come back within the first listened period
        if self.samples <= frames {
            self.wait_samples = self.wait_samples.saturating_sub(span + settle);
            debug!(
                trial,
                samples = self.samples,
                wait_samples = self.wait_samples,
                "early_noise_discarded"
            );
            return Step::to(LatencyState::Waiting);
        }

        let latency_ms = self.samples as f32 * 1000.0 / self.config.sample_rate as f32;
        self.results.push(latency_ms);
        info!(trial, latency_ms, "Round trip latency measured");
        let measured = LatencyEvent::TrialMeasured { trial, latency_ms };

        let Some(summary) = self.results.summary() else {
            return Step::to(LatencyState::Waiting).with(measured);
        };

        if summary.spread() > MAX_SPREAD {
            error!(
                trial,
                max_ms = summary.max_ms,
                min_ms = summary.min_ms,
                "Inconsistent round trip latency"
            );
            return Step::to(LatencyState::CompleteFailure)
                .with(measured)
                .with(LatencyEvent::Failed(FailureReason::Inconsistent {
                    max_ms: summary.max_ms,
                    min_ms: summary.min_ms,
                }));
        }

        if trial >= self.config.trials {
            self.final_result = Some(summary.mean_ms);
            info!(latency_ms = summary.mean_ms, "Final round trip latency");
            return Step::to(LatencyState::CompleteSuccess)
                .with(measured)
                .with(LatencyEvent::Completed {
                    latency_ms: summary.mean_ms,
                });
        }

        self.wait_samples = self.wait_samples.saturating_sub(span + settle);
        debug!(
            trial,
            samples = self.samples,
            wait_samples = self.wait_samples,
            levels = %format_levels(self.test_db.latest(DB_DUMP_LATEST)),
            "trial_recorded"
        );
        self.iteration += 1;
        Step::to(LatencyState::Waiting).with(measured)
    }

    fn wait(&mut self, block: &[i16]) -> Step {
        self.samples += block.len();
        if self.samples > self.config.sample_rate as usize * WAITING_SECONDS {
            self.samples = 0;
            self.sum = 0.0;
            return Step::to(LatencyState::SkipLead);
        }
        Step::to(LatencyState::Waiting)
    }

    /// Snapshot of the run for reporting
    pub fn report(&self) -> LatencyReport {
        LatencyReport {
            state: self.state,
            trials_ms: self.results.as_slice().to_vec(),
            final_ms: self.final_result,
            failure: self.failure,
            ambient_db: Some(self.calibration.avg_db).filter(|db| db.is_finite()),
            threshold: self.calibration.threshold,
            finished_at: chrono::Utc::now(),
        }
    }

    pub fn state(&self) -> LatencyState {
        self.state
    }

    pub fn config(&self) -> &LatencyConfig {
        &self.config
    }

    /// 1-based index of the trial in progress
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Ambient magnitude accumulated so far
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Linear detection threshold of the last calibration
    pub fn threshold(&self) -> f64 {
        self.calibration.threshold
    }

    /// Ambient level of the last calibration in dBFS
    pub fn measure_avg_db(&self) -> f64 {
        self.calibration.avg_db
    }

    pub fn wait_samples(&self) -> usize {
        self.wait_samples
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Round trip latency of each recorded trial in ms
    pub fn results(&self) -> &[f32] {
        self.results.as_slice()
    }

    /// Mean latency, set once the run succeeded
    pub fn final_result(&self) -> Option<f32> {
        self.final_result
    }

    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
    }

    pub fn silence_artifact(&self) -> u32 {
        self.silence_artifact
    }

    /// Input levels seen during the current listening phase
    pub fn test_db(&self) -> &DbLog {
        &self.test_db
    }

    pub fn is_capturing(&self) -> bool {
        self.is_capturing
    }

    pub fn periods_played(&self) -> u64 {
        self.periods_played
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    /// Whether the driver's time budget has been used up
    pub fn budget_exhausted(&self) -> bool {
        self.frames_captured >= self.config.frame_budget()
    }
}
