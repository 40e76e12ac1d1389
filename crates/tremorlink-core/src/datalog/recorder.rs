//! Recording buffer
//!
//! Accumulates samples while recording is on. Samples survive a stop so they
//! can be exported; they are dropped when a new recording starts or the
//! session is reset.

use super::RecordedSample;

/// Ordered buffer of recorded samples with an on/off switch
#[derive(Debug, Default, Clone)]
pub struct RecordingBuffer {
    samples: Vec<RecordedSample>,
    is_recording: bool,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording. Previously recorded samples are discarded; a no-op
    /// while already recording.
    pub fn start(&mut self) {
        if self.is_recording {
            return;
        }
        self.samples.clear();
        self.is_recording = true;
    }

    /// Stop recording, keeping what was captured
    pub fn stop(&mut self) {
        self.is_recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    /// Append a sample; ignored unless recording
    pub fn append(&mut self, sample: RecordedSample) {
        if self.is_recording {
            self.samples.push(sample);
        }
    }

    pub fn has_data(&self) -> bool {
        !self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[RecordedSample] {
        &self.samples
    }

    /// Hand the samples over, leaving the buffer empty
    pub fn take(&mut self) -> Vec<RecordedSample> {
        std::mem::take(&mut self.samples)
    }

    /// Drop everything and stop recording
    pub fn clear(&mut self) {
        self.samples.clear();
        self.is_recording = false;
    }

    /// Span of recorded session time in seconds
    pub fn duration(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }
}
