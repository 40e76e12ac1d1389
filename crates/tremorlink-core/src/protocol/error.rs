//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the haptic device
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Not connected to device")]
    NotConnected,

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection manager has shut down")]
    Closed,

    #[error("Invalid message from device: {0}")]
    InvalidMessage(String),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
