//! Streaming Sessions
//!
//! Replays a window of a signal bundle to the haptic device at the bundle's
//! own sampling rate, fanning every sent sample out to a live plot buffer
//! and the recorder.
//!
//! - [`clock`]: sampling rate to tick cadence
//! - [`ReplayCursor`]: walks the window, looping and keeping time monotonic
//! - [`StreamingEngine`]: the run/stop state machine
//! - [`StreamingSession`]: drives an engine from a tokio interval

pub mod clock;
mod cursor;
mod driver;
mod engine;
mod observers;
mod rate;
mod sink;

pub use clock::{Cadence, DEVICE_TARGET_INTERVAL, SIMULATION_TARGET_INTERVAL};
pub use cursor::{CursorSample, ReplayCursor};
pub use driver::{SessionEvent, StreamingSession};
pub use engine::{
    EngineConfig, SessionStats, StartRequest, StopReason, StreamState, StreamingEngine,
    TickOutcome,
};
pub use observers::{
    LivePlotBuffer, Observers, SampleObserver, StreamSample, CASE_STUDY_PLOT_CAPACITY,
    DEFAULT_PLOT_CAPACITY,
};
pub use rate::MessageRate;
pub use sink::{DeviceSink, NullSink};

use thiserror::Error;

use crate::api::CaseStudy;
use crate::protocol::ProtocolError;
use crate::signal::SignalError;

/// Errors starting or configuring a session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Streaming is already running")]
    AlreadyRunning,

    #[error("No signal data loaded")]
    NoData,

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error("Device not connected")]
    NotConnected,

    #[error("Session configuration cannot change while streaming")]
    Busy,

    #[error("Device error: {0}")]
    Device(ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whole-file, single-pass playback of a case study's feature
pub fn case_study_request(case: CaseStudy, feature: &str) -> StartRequest {
    StartRequest {
        channel: feature.to_string(),
        window: None,
        looping: false,
        record: false,
        case_id: Some(case.id().to_string()),
    }
}
