//! Streaming engine
//!
//! Synchronous run/stop state machine. Each `tick` draws one batch from the
//! replay cursor, sends it to the device sink and publishes it to the
//! observers. Timing lives in the driver; the engine only reacts.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clock::{Cadence, DEVICE_TARGET_INTERVAL, SIMULATION_TARGET_INTERVAL};
use super::cursor::ReplayCursor;
use super::observers::{
    Observers, SampleObserver, StreamSample, CASE_STUDY_PLOT_CAPACITY, DEFAULT_PLOT_CAPACITY,
};
use super::rate::MessageRate;
use super::sink::DeviceSink;
use super::SessionError;
use crate::datalog::{RecordMode, RecordedSample, RecordingBuffer};
use crate::protocol::{DataFrame, DeviceCommand, ProtocolError};
use crate::signal::{ReplayWindow, SignalError, StreamSource, DEFAULT_STREAM_CHANNEL};

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Tick interval the cadence aims for
    pub target_interval: Duration,
    pub plot_capacity: usize,
    pub record_mode: RecordMode,
}

impl EngineConfig {
    /// Streaming to a device
    pub fn device() -> Self {
        Self {
            target_interval: DEVICE_TARGET_INTERVAL,
            plot_capacity: DEFAULT_PLOT_CAPACITY,
            record_mode: RecordMode::SingleSignal,
        }
    }

    /// Plot-only playback
    pub fn simulation() -> Self {
        Self {
            target_interval: SIMULATION_TARGET_INTERVAL,
            plot_capacity: CASE_STUDY_PLOT_CAPACITY,
            record_mode: RecordMode::SingleSignal,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::device()
    }
}

/// What to stream
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub channel: String,
    /// `None` streams the whole bundle
    pub window: Option<ReplayWindow>,
    pub looping: bool,
    pub record: bool,
    /// Forwarded to the device with `startStreaming`
    pub case_id: Option<String>,
}

impl Default for StartRequest {
    fn default() -> Self {
        Self {
            channel: DEFAULT_STREAM_CHANNEL.to_string(),
            window: None,
            looping: false,
            record: false,
            case_id: None,
        }
    }
}

impl StartRequest {
    pub fn new(channel: impl Into<String>, window: ReplayWindow) -> Self {
        Self {
            channel: channel.into(),
            window: Some(window),
            ..Self::default()
        }
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn recording(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    pub fn with_case_id(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Running,
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    EndOfWindow,
    ConnectionLost,
    SendFailed,
    Reset,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::Manual => "stopped",
            StopReason::EndOfWindow => "end of window",
            StopReason::ConnectionLost => "connection lost",
            StopReason::SendFailed => "send failed",
            StopReason::Reset => "reset",
        };
        f.write_str(text)
    }
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running; nothing was done
    Idle,
    /// Batch sent, more to come
    Sent(usize),
    /// Batch sent and the window is done
    Finished(usize),
    /// The run was cut short
    Halted(StopReason),
}

impl TickOutcome {
    /// Whether the driver should keep ticking
    pub fn is_running(&self) -> bool {
        matches!(self, TickOutcome::Sent(_))
    }
}

/// Snapshot for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub state: StreamState,
    pub sampling_rate: Option<u32>,
    pub points_per_batch: Option<usize>,
    pub messages_sent: u64,
    pub messages_per_second: u64,
    /// Current run
    pub elapsed: Duration,
    /// All runs since the last reset
    pub total_elapsed: Duration,
    /// Session time the next sample lands on
    pub session_offset: f64,
    pub recorded_samples: usize,
    pub last_stop: Option<StopReason>,
}

/// Drives one replay against a device sink
pub struct StreamingEngine<D: DeviceSink> {
    device: D,
    config: EngineConfig,
    session_id: Uuid,
    source: Option<StreamSource>,
    state: StreamState,
    cursor: Option<ReplayCursor>,
    /// Timeline position carried into the next start
    carried_offset: f64,
    channel: Arc<str>,
    cadence: Option<Cadence>,
    sampling_rate: Option<u32>,
    stop_sent: bool,
    observers: Observers,
    rate: MessageRate,
    run_started: Option<Instant>,
    total_elapsed: Duration,
    last_stop: Option<StopReason>,
}

impl<D: DeviceSink> StreamingEngine<D> {
    pub fn new(device: D, config: EngineConfig) -> Self {
        Self {
            device,
            config,
            session_id: Uuid::new_v4(),
            source: None,
            state: StreamState::Idle,
            cursor: None,
            carried_offset: 0.0,
            channel: Arc::from(DEFAULT_STREAM_CHANNEL),
            cadence: None,
            sampling_rate: None,
            stop_sent: false,
            observers: Observers::new(config.plot_capacity, config.record_mode),
            rate: MessageRate::new(),
            run_started: None,
            total_elapsed: Duration::ZERO,
            last_stop: None,
        }
    }

    /// Replace the data to stream. Rejected while running.
    pub fn set_source(&mut self, source: StreamSource) -> Result<(), SessionError> {
        if self.state == StreamState::Running {
            return Err(SessionError::Busy);
        }
        self.source = Some(source);
        self.cursor = None;
        Ok(())
    }

    pub fn source(&self) -> Option<&StreamSource> {
        self.source.as_ref()
    }

    pub fn set_record_mode(&mut self, mode: RecordMode) -> Result<(), SessionError> {
        if self.state == StreamState::Running {
            return Err(SessionError::Busy);
        }
        self.observers.set_record_mode(mode);
        Ok(())
    }

    /// Begin streaming. Sends `startStreaming` with the window's sampling
    /// rate and returns the cadence the driver must tick at.
    pub fn start(&mut self, request: StartRequest) -> Result<Cadence, SessionError> {
        if self.state == StreamState::Running {
            return Err(SessionError::AlreadyRunning);
        }

        let source = self
            .source
            .clone()
            .filter(|s| !s.bundle().is_empty())
            .ok_or(SessionError::NoData)?;
        if !source.can_resolve(&request.channel) {
            return Err(SignalError::UnknownChannel(request.channel).into());
        }

        let window = match request.window {
            Some(window) => window,
            None => ReplayWindow::covering(source.bundle()).ok_or(SessionError::NoData)?,
        };
        let sampling_rate = window.sampling_rate(source.bundle())?;
        let cursor = ReplayCursor::new(source.shared_bundle(), window, request.looping)?
            .with_offset(self.carried_offset);

        if self.device.requires_connection() && !self.device.is_open() {
            warn!("Cannot start streaming: device not connected");
            return Err(SessionError::NotConnected);
        }

        let command = DeviceCommand::StartStreaming {
            sampling_rate,
            case_id: request.case_id.clone(),
        };
        self.device.send(&command.into()).map_err(|e| match e {
            ProtocolError::NotConnected => SessionError::NotConnected,
            other => SessionError::Device(other),
        })?;

        let cadence = Cadence::for_rate(sampling_rate, self.config.target_interval);
        if request.record {
            self.observers.recorder_mut().start();
        }

        info!(
            "Streaming '{}' [{:.3}, {:.3}) at {} Hz: {} points every {:?}{}",
            request.channel,
            window.start_time,
            window.end_time,
            sampling_rate,
            cadence.points_per_batch,
            cadence.interval,
            if request.looping { ", looping" } else { "" }
        );

        self.channel = Arc::from(request.channel.as_str());
        self.cursor = Some(cursor);
        self.cadence = Some(cadence);
        self.sampling_rate = Some(sampling_rate);
        self.stop_sent = false;
        self.state = StreamState::Running;
        self.rate.restart();
        self.run_started = Some(Instant::now());
        self.last_stop = None;

        Ok(cadence)
    }

    /// Send one batch
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.state != StreamState::Running {
            return TickOutcome::Idle;
        }
        if self.device.requires_connection() && !self.device.is_open() {
            warn!("Connection lost while streaming");
            self.finish(StopReason::ConnectionLost);
            return TickOutcome::Halted(StopReason::ConnectionLost);
        }

        let (Some(cursor), Some(source), Some(cadence)) =
            (self.cursor.as_mut(), self.source.as_ref(), self.cadence)
        else {
            return TickOutcome::Idle;
        };

        let mut sent = 0;
        let mut failure = None;
        for _ in 0..cadence.points_per_batch {
            let Some(drawn) = cursor.next_sample() else {
                break;
            };
            let Some(value) = source.resolve(&self.channel, drawn.index) else {
                continue;
            };

            let frame = DataFrame {
                time: drawn.time,
                value,
            };
            if let Err(e) = self.device.send(&frame.into()) {
                failure = Some(e);
                break;
            }
            sent += 1;

            self.observers.publish(
                &StreamSample {
                    index: drawn.index,
                    time: drawn.time,
                    channel: Arc::clone(&self.channel),
                    value,
                },
                source,
            );

            if cursor.is_exhausted() {
                break;
            }
        }
        let exhausted = cursor.is_exhausted();

        self.rate.record(sent as u64, now);

        if let Some(e) = failure {
            warn!("Failed to send data frame: {}", e);
            self.finish(StopReason::SendFailed);
            return TickOutcome::Halted(StopReason::SendFailed);
        }
        if exhausted {
            self.finish(StopReason::EndOfWindow);
            return TickOutcome::Finished(sent);
        }
        TickOutcome::Sent(sent)
    }

    /// Stop streaming. Returns false when already idle.
    pub fn stop(&mut self) -> bool {
        self.finish(StopReason::Manual)
    }

    /// Stop because the connection dropped
    pub fn connection_lost(&mut self) -> bool {
        self.finish(StopReason::ConnectionLost)
    }

    /// Stop if running, then clear plotted and recorded data and rewind the
    /// session timeline. The connection is left alone.
    pub fn reset(&mut self) {
        self.finish(StopReason::Reset);
        self.observers.clear();
        self.carried_offset = 0.0;
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.reset();
        }
        self.rate.reset();
        self.total_elapsed = Duration::ZERO;
        self.stop_sent = false;
        self.session_id = Uuid::new_v4();
        debug!("Session reset");
    }

    fn finish(&mut self, reason: StopReason) -> bool {
        if self.state != StreamState::Running {
            return false;
        }
        self.state = StreamState::Idle;

        if let Some(cursor) = self.cursor.as_mut() {
            cursor.finish_pass();
            self.carried_offset = cursor.offset();
        }

        // The link this run started on is gone
        if reason != StopReason::ConnectionLost && !self.stop_sent && self.device.is_open() {
            match self.device.send(&DeviceCommand::StopStreaming.into()) {
                Ok(()) => self.stop_sent = true,
                Err(e) => warn!("Failed to send stop command: {}", e),
            }
        }

        self.observers.recorder_mut().stop();
        if let Some(started) = self.run_started.take() {
            self.total_elapsed += started.elapsed();
        }
        self.last_stop = Some(reason);

        info!(
            "Streaming stopped ({}): {} messages sent",
            reason,
            self.rate.total()
        );
        true
    }

    /// Begin recording published samples. Clears earlier recordings.
    pub fn start_recording(&mut self) {
        self.observers.recorder_mut().start();
    }

    pub fn stop_recording(&mut self) {
        self.observers.recorder_mut().stop();
    }

    pub fn is_recording(&self) -> bool {
        self.observers.recorder().is_recording()
    }

    pub fn recorder(&self) -> &RecordingBuffer {
        self.observers.recorder()
    }

    pub fn recorded(&self) -> &[RecordedSample] {
        self.observers.recorder().samples()
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    pub fn set_plot_enabled(&mut self, enabled: bool) {
        self.observers.set_plot_enabled(enabled);
    }

    pub fn attach_observer(&mut self, observer: Box<dyn SampleObserver>) {
        self.observers.attach(observer);
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == StreamState::Running
    }

    pub fn cadence(&self) -> Option<Cadence> {
        self.cadence
    }

    pub fn last_stop(&self) -> Option<StopReason> {
        self.last_stop
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Session time the next sample will carry
    pub fn session_offset(&self) -> f64 {
        match (&self.cursor, self.state) {
            (Some(cursor), StreamState::Running) => cursor.offset(),
            _ => self.carried_offset,
        }
    }

    pub fn stats(&self) -> SessionStats {
        let elapsed = self
            .run_started
            .map(|started| started.elapsed())
            .unwrap_or_default();
        SessionStats {
            session_id: self.session_id,
            state: self.state,
            sampling_rate: self.sampling_rate,
            points_per_batch: self.cadence.map(|c| c.points_per_batch),
            messages_sent: self.rate.total(),
            messages_per_second: self.rate.per_second(),
            elapsed,
            total_elapsed: self.total_elapsed + elapsed,
            session_offset: self.session_offset(),
            recorded_samples: self.observers.recorder().len(),
            last_stop: self.last_stop,
        }
    }
}
