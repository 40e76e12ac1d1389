//! Signal bundles
//!
//! A bundle is the time axis plus every named channel the processing backend
//! produced for one recording.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::SignalError;

/// Time-aligned set of named channels derived from one recording
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalBundle {
    /// Sample times in seconds, strictly increasing
    pub time: Vec<f64>,
    /// Channel name -> samples, one per entry in `time`
    #[serde(flatten)]
    pub channels: BTreeMap<String, Vec<f64>>,
}

impl SignalBundle {
    /// Build a bundle and check its invariants
    pub fn new(time: Vec<f64>, channels: BTreeMap<String, Vec<f64>>) -> Result<Self, SignalError> {
        let bundle = Self { time, channels };
        bundle.validate()?;
        Ok(bundle)
    }

    /// Check that every channel matches the time axis and time increases
    pub fn validate(&self) -> Result<(), SignalError> {
        for (name, samples) in &self.channels {
            if samples.len() != self.time.len() {
                return Err(SignalError::LengthMismatch {
                    channel: name.clone(),
                    expected: self.time.len(),
                    actual: samples.len(),
                });
            }
        }
        if let Some(index) = self
            .time
            .windows(2)
            .position(|pair| !(pair[1] > pair[0]))
        {
            return Err(SignalError::NonMonotonicTime { index: index + 1 });
        }
        Ok(())
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Samples of a channel
    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        self.channels.get(name).map(|v| v.as_slice())
    }

    /// Value of a channel at a sample index
    pub fn value(&self, name: &str, index: usize) -> Option<f64> {
        self.channels.get(name)?.get(index).copied()
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(|k| k.as_str())
    }

    /// First and last timestamp
    pub fn time_range(&self) -> Option<(f64, f64)> {
        Some((*self.time.first()?, *self.time.last()?))
    }

    /// Sampling rate from the spacing of the first two samples, rounded to Hz
    pub fn sampling_rate(&self) -> Option<u32> {
        sampling_rate_at(&self.time, 0)
    }
}

/// Sampling rate from the spacing between `time[index]` and `time[index + 1]`
pub(crate) fn sampling_rate_at(time: &[f64], index: usize) -> Option<u32> {
    let dt = time.get(index + 1)? - time.get(index)?;
    if !(dt > 0.0) || !dt.is_finite() {
        return None;
    }
    let rate = (1.0 / dt).round();
    if rate >= 1.0 && rate <= u32::MAX as f64 {
        Some(rate as u32)
    } else {
        None
    }
}

/// Normalized/centered channel variants aligned to a bundle's time axis
pub type NormalizedChannels = BTreeMap<String, Vec<f64>>;

/// Everything a streaming session reads from: the raw bundle and, when the
/// presentation layer has produced them, the normalized variants
#[derive(Debug, Clone)]
pub struct StreamSource {
    bundle: Arc<SignalBundle>,
    normalized: Option<Arc<NormalizedChannels>>,
}

impl StreamSource {
    /// Source without normalized channels
    pub fn new(bundle: Arc<SignalBundle>) -> Self {
        Self {
            bundle,
            normalized: None,
        }
    }

    /// Attach normalized channels; each must match the bundle length
    pub fn with_normalized(mut self, normalized: NormalizedChannels) -> Result<Self, SignalError> {
        for (name, samples) in &normalized {
            if samples.len() != self.bundle.len() {
                return Err(SignalError::LengthMismatch {
                    channel: name.clone(),
                    expected: self.bundle.len(),
                    actual: samples.len(),
                });
            }
        }
        self.normalized = Some(Arc::new(normalized));
        Ok(self)
    }

    pub fn bundle(&self) -> &SignalBundle {
        &self.bundle
    }

    /// Shared handle to the bundle
    pub fn shared_bundle(&self) -> Arc<SignalBundle> {
        Arc::clone(&self.bundle)
    }

    pub fn normalized(&self) -> Option<&NormalizedChannels> {
        self.normalized.as_deref()
    }

    pub fn has_normalized(&self, channel: &str) -> bool {
        self.normalized
            .as_ref()
            .is_some_and(|n| n.contains_key(channel))
    }

    /// Streamed value of a channel: the normalized variant when present,
    /// otherwise the raw bundle value
    pub fn resolve(&self, channel: &str, index: usize) -> Option<f64> {
        if let Some(normalized) = &self.normalized {
            if let Some(samples) = normalized.get(channel) {
                return samples.get(index).copied();
            }
        }
        self.bundle.value(channel, index)
    }

    /// Normalized variant `normalized_name` if present, else raw `raw_name`
    pub fn resolve_pair(&self, normalized_name: &str, raw_name: &str, index: usize) -> Option<f64> {
        self.normalized
            .as_ref()
            .and_then(|n| n.get(normalized_name))
            .and_then(|samples| samples.get(index).copied())
            .or_else(|| self.bundle.value(raw_name, index))
    }

    /// Whether a channel can be streamed from this source
    pub fn can_resolve(&self, channel: &str) -> bool {
        self.has_normalized(channel) || self.bundle.channels.contains_key(channel)
    }
}
