//! Signal Data
//!
//! Time-series bundles produced by the processing backend and the replay
//! windows selected over them.

mod bundle;
mod window;

pub use bundle::{NormalizedChannels, SignalBundle, StreamSource};
pub use window::{ReplayWindow, WindowIndices};

use thiserror::Error;

/// Channels recorded in all-signal mode, as `(recorded name, normalized
/// variant, raw channel)`
pub const ALL_SIGNAL_FIELDS: &[(&str, &str, &str)] = &[
    ("rawAngle", "centeredAngle", "rawAngle"),
    ("baseAngle", "centeredBaseAngle", "baseAngle"),
    ("tremor", "centeredTremor", "tremor"),
    ("envelope", "centeredEnvelope", "envelope"),
    ("torque", "centeredTorque", "torque"),
    ("wfeDisp", "wfeDisp", "wfeDisp"),
];

/// Channel streamed when nothing else is selected
pub const DEFAULT_STREAM_CHANNEL: &str = "centeredTorque";

/// Errors from bundle and window validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    #[error("Signal bundle is empty")]
    EmptyBundle,

    #[error("Channel '{channel}' has {actual} samples, time axis has {expected}")]
    LengthMismatch {
        channel: String,
        expected: usize,
        actual: usize,
    },

    #[error("Time axis is not strictly increasing at index {index}")]
    NonMonotonicTime { index: usize },

    #[error("Invalid replay window [{start_time}, {end_time})")]
    InvalidWindow { start_time: f64, end_time: f64 },

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Cannot determine sampling rate")]
    UndeterminedSamplingRate,
}
