//! Processing Backend
//!
//! HTTP client for the service that lists recordings, decomposes them into
//! signal bundles and stores exported recordings.
//!
//! ## Usage
//!
//! ```ignore
//! let backend = BackendClient::new("http://localhost:5001")?;
//! let files = backend.list_files().await?;
//! let bundle = backend
//!     .process_signal(&files[0], &ProcessingParameters::default())
//!     .await?;
//! ```

mod client;
mod types;

pub use client::BackendClient;
pub use types::{
    CaseStudiesConfig, CaseStudy, FeatureSeries, ProcessingParameters, SaveResponse,
};

use thiserror::Error;

use crate::signal::SignalError;

/// Where the backend listens unless configured otherwise
pub const DEFAULT_API_URL: &str = "http://localhost:5001";

/// Errors talking to the processing backend
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Backend returned an invalid bundle: {0}")]
    InvalidBundle(#[from] SignalError),
}
