//! # TremorLink Core Library
//!
//! Core functionality for streaming tremor signals to a wearable haptic
//! actuator.

#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - WebSocket protocol and connection management for the haptic controller
//! - Signal bundles and replay windows
//! - Rate-matched streaming sessions with looping and recording
//! - Recording export (CSV and the processing backend)
//! - A client for the signal processing backend
//! - Synthetic tremor data for offline use
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tremorlink_core::prelude::*;
//!
//! let manager = ConnectionManager::create(ConnectionConfig::default(), Arc::new(WebSocketConnector));
//! manager.connect();
//!
//! let backend = BackendClient::new("http://localhost:5001")?;
//! let bundle = backend.process_signal("patient_07.csv", &ProcessingParameters::default()).await?;
//!
//! let session = StreamingSession::with_connection(manager.handle(), EngineConfig::device());
//! session.set_source(StreamSource::new(Arc::new(bundle))).await?;
//! session
//!     .start(StartRequest::new("centeredTorque", ReplayWindow::new(0.0, 10.0)).looping(true))
//!     .await?;
//! ```

pub mod api;
pub mod config;
pub mod datalog;
pub mod demo;
pub mod manual;
pub mod protocol;
pub mod session;
pub mod signal;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{BackendClient, CaseStudy, ProcessingParameters};
    pub use crate::config::TremorLinkConfig;
    pub use crate::datalog::{RecordMode, RecordedSample, RecordingBuffer};
    pub use crate::manual::ManualControl;
    pub use crate::protocol::{
        ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState,
        WebSocketConnector,
    };
    pub use crate::session::{
        EngineConfig, SessionError, StartRequest, StreamState, StreamingEngine, StreamingSession,
    };
    pub use crate::signal::{ReplayWindow, SignalBundle, StreamSource};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
