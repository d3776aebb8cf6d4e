//! Full-duplex audio driver for the latency test
//!
//! Provides high-level interface for:
//! - Enumerating audio devices
//! - Opening mono input/output streams
//! - Driving [`LatencyTest`] once per period from the stream callbacks
//!
//! ## Callback model
//!
//! cpal delivers input and output on their own callbacks, with buffer sizes
//! chosen by the host. Both sides re-block the stream into exact periods
//! with a ring buffer and lock the shared test only for the duration of one
//! period. Events leave the callbacks through a bounded crossbeam channel
//! with `try_send`, so a slow consumer never stalls the audio thread.

use crate::audio::tone::SineGenerator;
use crate::latency::{
    FailureReason, LatencyConfig, LatencyError, LatencyEvent, LatencyReport, LatencyState,
    LatencyTest, Playback, PLAYBACK_DRAIN_SECONDS,
};
use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleRate, Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Minimum ring size in samples for re-blocking callback data
const MIN_RING_SIZE: usize = 16384;

/// Capacity of the callback -> controller event channel
const EVENT_CHANNEL_SIZE: usize = 64;

/// How often the controller wakes up to check the clock
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that can occur during audio engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No audio devices found")]
    NoDevicesFound,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No device selected")]
    NoDeviceSelected,

    #[error("Audio host not available: {0}")]
    HostUnavailable(String),

    #[error("Latency test interrupted")]
    Interrupted,
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Whether this is the default device
    pub is_default: bool,
    /// Supported sample rates
    pub sample_rates: Vec<u32>,
    /// Number of input channels
    pub input_channels: u16,
    /// Number of output channels
    pub output_channels: u16,
}

/// Audio engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine is stopped
    Stopped,
    /// Engine is running and processing audio
    Running,
    /// Engine encountered an error
    Error,
}

/// Messages sent from the stream callbacks to the controlling thread
#[derive(Debug, Clone)]
pub enum EngineMessage {
    /// Diagnostic from the state machine
    Event(LatencyEvent),
    /// The input stream violated the period contract
    Fatal(LatencyError),
    /// Playback drained and stopped in this state
    PlaybackFinished(LatencyState),
}

/// Duplex audio engine that runs one latency test
pub struct LatencyEngine {
    state: EngineState,
    config: LatencyConfig,
    device_name: Option<String>,
    host: Option<Host>,
    device: Option<Device>,
    input_stream: Option<Stream>,
    output_stream: Option<Stream>,
    test: Option<Arc<Mutex<LatencyTest>>>,
    event_rx: Option<Receiver<EngineMessage>>,
    running: Option<Arc<AtomicBool>>,
}

impl LatencyEngine {
    /// Create a new engine for the given configuration
    pub fn new(config: LatencyConfig) -> Self {
        Self {
            state: EngineState::Stopped,
            config,
            device_name: None,
            host: None,
            device: None,
            input_stream: None,
            output_stream: None,
            test: None,
            event_rx: None,
            running: None,
        }
    }

    /// Get current engine state
    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &LatencyConfig {
        &self.config
    }

    /// Get the selected device name
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    fn get_host() -> Result<Host> {
        #[cfg(all(target_os = "windows", feature = "asio"))]
        {
            cpal::host_from_id(cpal::HostId::Asio)
                .map_err(|e| EngineError::HostUnavailable(e.to_string()).into())
        }

        #[cfg(not(all(target_os = "windows", feature = "asio")))]
        {
            Ok(cpal::default_host())
        }
    }

    /// List available devices
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let host = Self::get_host()?;
        let mut devices = Vec::new();

        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        for device in host.devices()? {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let is_default = default_input.as_deref() == Some(name.as_str())
                || default_output.as_deref() == Some(name.as_str());

            let input_channels = device
                .default_input_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            let output_channels = device
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(0);

            let common_rates = [8000, 16000, 44100, 48000, 88200, 96000, 192000];
            let mut sample_rates = Vec::new();
            if let Ok(configs) = device.supported_output_configs() {
                for config in configs {
                    for &rate in &common_rates {
                        if (config.min_sample_rate().0..=config.max_sample_rate().0).contains(&rate)
                            && !sample_rates.contains(&rate)
                        {
                            sample_rates.push(rate);
                        }
                    }
                }
            }
            sample_rates.sort();

            devices.push(DeviceInfo {
                name,
                is_default,
                sample_rates,
                input_channels,
                output_channels,
            });
        }

        Ok(devices)
    }

    /// Select a device by name
    pub fn select_device(&mut self, name: &str) -> Result<()> {
        let host = Self::get_host()?;

        let device = host
            .devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| EngineError::DeviceNotFound(name.to_string()))?;

        self.host = Some(host);
        self.device = Some(device);
        self.device_name = Some(name.to_string());
        Ok(())
    }

    /// Select the host's default duplex device
    pub fn select_default_device(&mut self) -> Result<()> {
        let host = Self::get_host()?;
        let device = host
            .default_output_device()
            .or_else(|| host.default_input_device())
            .ok_or(EngineError::NoDevicesFound)?;

        self.device_name = device.name().ok();
        self.host = Some(host);
        self.device = Some(device);
        Ok(())
    }

    /// Open the streams and start the test
    pub fn start(&mut self) -> Result<()> {
        let device = self.device.as_ref().ok_or(EngineError::NoDeviceSelected)?;

        let test = Arc::new(Mutex::new(LatencyTest::new(self.config.clone())?));
        let period = self.config.period_size;
        let ring_size = (period * 8).max(MIN_RING_SIZE);

        let stream_config = Self::negotiate_config(device, &self.config)?;
        tracing::info!(
            sample_rate = self.config.sample_rate,
            period_size = period,
            buffer_size = ?stream_config.buffer_size,
            "Stream config negotiated"
        );

        let (event_tx, event_rx) = crossbeam_channel::bounded::<EngineMessage>(EVENT_CHANNEL_SIZE);
        let running = Arc::new(AtomicBool::new(true));

        let output_stream = Self::build_output(
            device,
            &stream_config,
            &self.config,
            Arc::clone(&test),
            event_tx.clone(),
            Arc::clone(&running),
            ring_size,
        )?;
        let input_stream = Self::build_input(
            device,
            &stream_config,
            period,
            Arc::clone(&test),
            event_tx,
            Arc::clone(&running),
            ring_size,
        )?;

        output_stream.play()?;
        input_stream.play()?;

        self.output_stream = Some(output_stream);
        self.input_stream = Some(input_stream);
        self.test = Some(test);
        self.event_rx = Some(event_rx);
        self.running = Some(running);
        self.state = EngineState::Running;

        tracing::info!(
            "Latency engine started: {} @ {}Hz, {} frames per period",
            self.device_name.as_deref().unwrap_or("unknown"),
            self.config.sample_rate,
            period
        );
        Ok(())
    }

    /// Prefer a fixed buffer of one period, fall back to the host default
    fn negotiate_config(device: &Device, config: &LatencyConfig) -> Result<StreamConfig> {
        let fixed = StreamConfig {
            channels: config.channels,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: BufferSize::Fixed(config.period_size as u32),
        };
        match device.build_output_stream(
            &fixed,
            |_: &mut [f32], _: &cpal::OutputCallbackInfo| {},
            |_| {},
            None,
        ) {
            Ok(_stream) => Ok(fixed),
            Err(e) => {
                tracing::warn!(
                    "Fixed buffer of {} frames rejected ({}), using host default",
                    config.period_size,
                    e
                );
                Ok(StreamConfig {
                    buffer_size: BufferSize::Default,
                    ..fixed
                })
            }
        }
    }

    fn build_output(
        device: &Device,
        stream_config: &StreamConfig,
        config: &LatencyConfig,
        test: Arc<Mutex<LatencyTest>>,
        event_tx: Sender<EngineMessage>,
        running: Arc<AtomicBool>,
        ring_size: usize,
    ) -> Result<Stream> {
        let period = config.period_size;
        let mut probe =
            SineGenerator::new(config.sample_rate, config.tone_frequency, config.tone_amplitude);
        let (mut producer, mut consumer) = HeapRb::<i16>::new(ring_size).split();
        let mut block = vec![0i16; period];
        let mut finished = false;

        let stream = device.build_output_stream(
            stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !running.load(Ordering::Relaxed) || finished {
                    data.fill(0.0);
                    return;
                }

                while consumer.occupied_len() < data.len() && producer.vacant_len() >= period {
                    let playback = match test.lock() {
                        Ok(mut guard) => guard.handle_output(&mut block, &mut probe),
                        Err(_) => {
                            block.fill(0);
                            Playback::Continue
                        }
                    };
                    if let Playback::Finished(state) = playback {
                        finished = true;
                        let _ = event_tx.try_send(EngineMessage::PlaybackFinished(state));
                        break;
                    }
                    producer.push_slice(&block);
                }

                for out in data.iter_mut() {
                    *out = consumer
                        .try_pop()
                        .map(|s| s as f32 / 32768.0)
                        .unwrap_or(0.0);
                }
            },
            move |err| {
                tracing::error!("Output stream error: {}", err);
            },
            None,
        )?;
        Ok(stream)
    }

    fn build_input(
        device: &Device,
        stream_config: &StreamConfig,
        period: usize,
        test: Arc<Mutex<LatencyTest>>,
        event_tx: Sender<EngineMessage>,
        running: Arc<AtomicBool>,
        ring_size: usize,
    ) -> Result<Stream> {
        let (mut producer, mut consumer) = HeapRb::<i16>::new(ring_size).split();
        let mut block = vec![0i16; period];
        let mut failed = false;

        let stream = device.build_input_stream(
            stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) || failed {
                    return;
                }

                for &sample in data {
                    let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    if producer.try_push(value).is_err() {
                        tracing::warn!("Input ring overflow, dropping samples");
                        break;
                    }
                }

                while consumer.occupied_len() >= period {
                    consumer.pop_slice(&mut block);
                    let Ok(mut guard) = test.lock() else {
                        return;
                    };
                    match guard.handle_input(&block) {
                        Ok(events) => {
                            for event in events {
                                let _ = event_tx.try_send(EngineMessage::Event(event));
                            }
                        }
                        Err(e) => {
                            failed = true;
                            let _ = event_tx.try_send(EngineMessage::Fatal(e));
                            return;
                        }
                    }
                    if guard.budget_exhausted() {
                        if let Some(event) = guard.abort(FailureReason::TimeLimitExceeded) {
                            let _ = event_tx.try_send(EngineMessage::Event(event));
                        }
                    }
                }
            },
            move |err| {
                tracing::error!("Input stream error: {}", err);
            },
            None,
        )?;
        Ok(stream)
    }

    /// Block until the test finishes, forwarding every event to `on_event`
    ///
    /// `interrupt` is polled between events; setting it aborts the run.
    /// A wall-clock deadline slightly past the configured budget guards
    /// against a device that stops delivering input.
    pub fn run(
        &mut self,
        interrupt: &AtomicBool,
        mut on_event: impl FnMut(&LatencyEvent),
    ) -> Result<LatencyReport> {
        let rx = self
            .event_rx
            .clone()
            .ok_or_else(|| anyhow!("Engine not started"))?;
        let test = self
            .test
            .clone()
            .ok_or_else(|| anyhow!("Engine not started"))?;

        let deadline =
            Instant::now() + Duration::from_secs(self.config.time_limit_secs as u64 + 2);
        let mut drain_deadline: Option<Instant> = None;

        loop {
            if interrupt.load(Ordering::SeqCst) {
                self.stop()?;
                return Err(EngineError::Interrupted.into());
            }

            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(EngineMessage::Event(event)) => {
                    on_event(&event);
                    if matches!(event, LatencyEvent::Completed { .. } | LatencyEvent::Failed(_)) {
                        drain_deadline = Some(
                            Instant::now() + Duration::from_secs(PLAYBACK_DRAIN_SECONDS + 1),
                        );
                    }
                }
                Ok(EngineMessage::Fatal(e)) => {
                    tracing::error!("Fatal stream error: {}", e);
                    self.state = EngineState::Error;
                    self.stop()?;
                    return Err(e.into());
                }
                Ok(EngineMessage::PlaybackFinished(state)) => {
                    tracing::debug!(?state, "playback_finished");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    if drain_deadline.is_some_and(|d| now >= d) {
                        break;
                    }
                    if drain_deadline.is_none() && now >= deadline {
                        let event = test
                            .lock()
                            .map_err(|_| anyhow!("Latency test state poisoned"))?
                            .abort(FailureReason::TimeLimitExceeded);
                        if let Some(event) = event {
                            on_event(&event);
                        }
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let report = test
            .lock()
            .map_err(|_| anyhow!("Latency test state poisoned"))?
            .report();
        self.stop()?;
        Ok(report)
    }

    /// Stop audio processing
    pub fn stop(&mut self) -> Result<()> {
        if let Some(ref running) = self.running {
            running.store(false, Ordering::Relaxed);
        }

        self.input_stream = None;
        self.output_stream = None;
        self.event_rx = None;
        self.running = None;

        if self.state == EngineState::Running {
            self.state = EngineState::Stopped;
        }
        tracing::info!("Latency engine stopped");
        Ok(())
    }

    /// Snapshot of the test in progress
    pub fn report(&self) -> Option<LatencyReport> {
        self.test
            .as_ref()
            .and_then(|t| t.lock().ok())
            .map(|t| t.report())
    }
}

impl Default for LatencyEngine {
    fn default() -> Self {
        Self::new(LatencyConfig::default())
    }
}

impl Drop for LatencyEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
