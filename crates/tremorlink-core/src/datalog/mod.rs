//! Data Logging
//!
//! Records the samples a streaming session publishes and exports them.

mod format;
mod recorder;

pub use format::{export_filename, write_csv, ExportMetadata, NormalizationMethod};
pub use recorder::RecordingBuffer;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::signal::{StreamSource, ALL_SIGNAL_FIELDS};

/// Which fields a recorded sample carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    /// Only the streamed channel
    #[default]
    SingleSignal,
    /// The streamed channel plus every field in [`ALL_SIGNAL_FIELDS`]
    AllSignals,
}

impl RecordMode {
    /// Tag used in export filenames
    pub fn tag(&self) -> &'static str {
        match self {
            RecordMode::SingleSignal => "single_signal",
            RecordMode::AllSignals => "all_signals",
        }
    }
}

/// A single recorded sample: session time plus named values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSample {
    /// Session timeline timestamp in seconds
    pub time: f64,
    /// Field name -> value. Fields the source could not resolve are absent.
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl RecordedSample {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style value insert
    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Capture a streamed sample.
    ///
    /// In all-signal mode every [`ALL_SIGNAL_FIELDS`] entry is looked up at
    /// the same source index, preferring the normalized variant.
    pub fn capture(
        time: f64,
        channel: &str,
        value: f64,
        source: &StreamSource,
        index: usize,
        mode: RecordMode,
    ) -> Self {
        let mut sample = Self::new(time);
        if mode == RecordMode::AllSignals {
            for (name, normalized, raw) in ALL_SIGNAL_FIELDS {
                if let Some(v) = source.resolve_pair(normalized, raw, index) {
                    sample.values.insert((*name).to_string(), v);
                }
            }
        }
        sample.values.insert(channel.to_string(), value);
        sample
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{NormalizedChannels, SignalBundle};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn source() -> StreamSource {
        let mut channels = BTreeMap::new();
        channels.insert("rawAngle".to_string(), vec![10.0, 11.0]);
        channels.insert("torque".to_string(), vec![0.5, 0.6]);
        channels.insert("wfeDisp".to_string(), vec![3.0, 4.0]);
        let bundle = SignalBundle::new(vec![0.0, 0.01], channels).unwrap();

        let mut normalized = NormalizedChannels::new();
        normalized.insert("centeredTorque".to_string(), vec![128.0, 140.0]);
        StreamSource::new(Arc::new(bundle))
            .with_normalized(normalized)
            .unwrap()
    }

    #[test]
    fn test_single_signal_capture() {
        let sample =
            RecordedSample::capture(1.5, "centeredTorque", 140.0, &source(), 1, RecordMode::SingleSignal);
        assert_eq!(sample, RecordedSample::new(1.5).with_value("centeredTorque", 140.0));
    }

    #[test]
    fn test_all_signal_capture_prefers_normalized() {
        let sample =
            RecordedSample::capture(0.01, "centeredTorque", 140.0, &source(), 1, RecordMode::AllSignals);

        assert_eq!(sample.get("torque"), Some(140.0));
        assert_eq!(sample.get("rawAngle"), Some(11.0));
        assert_eq!(sample.get("wfeDisp"), Some(4.0));
        assert_eq!(sample.get("centeredTorque"), Some(140.0));
        assert_eq!(sample.get("tremor"), None);
    }

    #[test]
    fn test_serializes_flat() {
        let sample = RecordedSample::new(0.25).with_value("torque", 1.0);
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"time":0.25,"torque":1.0}"#);
    }
}
