//! Sample observers
//!
//! Every sample a session sends is published once. The live plot and the
//! recorder are the built-in consumers; callers may attach more.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::datalog::{RecordMode, RecordedSample, RecordingBuffer};
use crate::signal::StreamSource;

/// Default live plot history
pub const DEFAULT_PLOT_CAPACITY: usize = 10_000;

/// History kept when plotting case-study playback
pub const CASE_STUDY_PLOT_CAPACITY: usize = 1000;

/// A sample as published to observers
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSample {
    /// Index into the source bundle
    pub index: usize,
    /// Session timeline timestamp
    pub time: f64,
    pub channel: Arc<str>,
    pub value: f64,
}

/// Extra consumer of published samples
pub trait SampleObserver: Send {
    fn on_sample(&mut self, sample: &StreamSample, source: &StreamSource);

    /// Called when the data was reset
    fn on_reset(&mut self) {}
}

/// Rolling `(time, value)` history for live display
#[derive(Debug, Clone)]
pub struct LivePlotBuffer {
    points: VecDeque<(f64, f64)>,
    capacity: usize,
    channel: Option<Arc<str>>,
}

impl Default for LivePlotBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PLOT_CAPACITY)
    }
}

impl LivePlotBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity.min(DEFAULT_PLOT_CAPACITY)),
            capacity: capacity.max(1),
            channel: None,
        }
    }

    pub fn push(&mut self, sample: &StreamSample) {
        if self.channel.as_deref() != Some(&*sample.channel) {
            self.points.clear();
            self.channel = Some(sample.channel.clone());
        }
        if self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back((sample.time, sample.value));
    }

    /// Channel currently plotted
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().copied()
    }

    pub fn latest(&self) -> Option<(f64, f64)> {
        self.points.back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.channel = None;
    }
}

/// The set of consumers a session publishes to. Plotting and recording are
/// toggled independently.
pub struct Observers {
    plot: LivePlotBuffer,
    plot_enabled: bool,
    recorder: RecordingBuffer,
    record_mode: RecordMode,
    extra: Vec<Box<dyn SampleObserver>>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("plot_points", &self.plot.len())
            .field("plot_enabled", &self.plot_enabled)
            .field("recorded", &self.recorder.len())
            .field("record_mode", &self.record_mode)
            .field("extra", &self.extra.len())
            .finish()
    }
}

impl Default for Observers {
    fn default() -> Self {
        Self::new(DEFAULT_PLOT_CAPACITY, RecordMode::default())
    }
}

impl Observers {
    pub fn new(plot_capacity: usize, record_mode: RecordMode) -> Self {
        Self {
            plot: LivePlotBuffer::new(plot_capacity),
            plot_enabled: true,
            recorder: RecordingBuffer::new(),
            record_mode,
            extra: Vec::new(),
        }
    }

    /// Deliver one sample to every active consumer
    pub fn publish(&mut self, sample: &StreamSample, source: &StreamSource) {
        if self.plot_enabled {
            self.plot.push(sample);
        }
        if self.recorder.is_recording() {
            self.recorder.append(RecordedSample::capture(
                sample.time,
                &sample.channel,
                sample.value,
                source,
                sample.index,
                self.record_mode,
            ));
        }
        for observer in &mut self.extra {
            observer.on_sample(sample, source);
        }
    }

    pub fn attach(&mut self, observer: Box<dyn SampleObserver>) {
        self.extra.push(observer);
    }

    pub fn set_plot_enabled(&mut self, enabled: bool) {
        self.plot_enabled = enabled;
    }

    pub fn plot_enabled(&self) -> bool {
        self.plot_enabled
    }

    pub fn plot(&self) -> &LivePlotBuffer {
        &self.plot
    }

    pub fn recorder(&self) -> &RecordingBuffer {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut RecordingBuffer {
        &mut self.recorder
    }

    pub fn record_mode(&self) -> RecordMode {
        self.record_mode
    }

    pub fn set_record_mode(&mut self, mode: RecordMode) {
        self.record_mode = mode;
    }

    /// Drop plotted and recorded data
    pub fn clear(&mut self) {
        self.plot.clear();
        self.recorder.clear();
        for observer in &mut self.extra {
            observer.on_reset();
        }
    }
}
