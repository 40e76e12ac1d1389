//! Replay windows

use serde::{Deserialize, Serialize};

use super::bundle::{sampling_rate_at, SignalBundle};
use super::SignalError;

/// The `[start_time, end_time)` subrange of a bundle selected for streaming
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayWindow {
    pub start_time: f64,
    pub end_time: f64,
}

/// Sample indices a window covers: `start` inclusive, `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowIndices {
    pub start: usize,
    pub end: usize,
}

impl WindowIndices {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl ReplayWindow {
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    /// Window spanning a whole bundle. The end is pushed one sample period
    /// past the last timestamp so the last sample is included.
    pub fn covering(bundle: &SignalBundle) -> Option<Self> {
        let (first, last) = bundle.time_range()?;
        let period = bundle
            .sampling_rate()
            .map(|rate| 1.0 / rate as f64)
            .unwrap_or(1.0);
        Some(Self::new(first, last + period))
    }

    /// Window length in seconds
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Resolve the window against a bundle.
    ///
    /// The start index is the first sample at or after `start_time`. The end
    /// index is the first sample at or after `end_time`, or the bundle length
    /// when `end_time` lies past the last sample.
    pub fn indices(&self, bundle: &SignalBundle) -> Result<WindowIndices, SignalError> {
        if bundle.is_empty() {
            return Err(SignalError::EmptyBundle);
        }
        if !(self.start_time < self.end_time) {
            return Err(SignalError::InvalidWindow {
                start_time: self.start_time,
                end_time: self.end_time,
            });
        }

        let start = bundle
            .time
            .iter()
            .position(|&t| t >= self.start_time)
            .ok_or(SignalError::InvalidWindow {
                start_time: self.start_time,
                end_time: self.end_time,
            })?;
        let end = bundle
            .time
            .iter()
            .position(|&t| t >= self.end_time)
            .unwrap_or(bundle.len());

        if start >= end {
            return Err(SignalError::InvalidWindow {
                start_time: self.start_time,
                end_time: self.end_time,
            });
        }
        Ok(WindowIndices { start, end })
    }

    /// Sampling rate of the selected segment.
    ///
    /// Uses the spacing of the first two samples inside the window, falling
    /// back to the bundle's first two samples for single-sample windows.
    pub fn sampling_rate(&self, bundle: &SignalBundle) -> Result<u32, SignalError> {
        let indices = self.indices(bundle)?;
        let from_segment = if indices.start + 1 < indices.end {
            sampling_rate_at(&bundle.time, indices.start)
        } else {
            None
        };
        from_segment
            .or_else(|| bundle.sampling_rate())
            .ok_or(SignalError::UndeterminedSamplingRate)
    }
}
