//! Device commands
//!
//! JSON text frames exchanged with the haptic controller.

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Control commands sent from the host to the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum DeviceCommand {
    /// Begin consuming data frames at the given rate
    StartStreaming {
        #[serde(rename = "samplingRate")]
        sampling_rate: u32,
        /// Case identifier when replaying a case study
        #[serde(skip_serializing_if = "Option::is_none", default)]
        case_id: Option<String>,
    },

    /// Stop consuming data frames
    StopStreaming,

    /// Keepalive
    Ping,

    /// Take direct control of the actuator
    StartManualControl { value: u8 },

    /// Update the manual actuator level
    ManualControl { value: u8 },

    /// Release direct control
    StopManualControl,
}

impl DeviceCommand {
    /// Start streaming without a case identifier
    pub fn start_streaming(sampling_rate: u32) -> Self {
        DeviceCommand::StartStreaming {
            sampling_rate,
            case_id: None,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::StartStreaming { .. } => "startStreaming",
            DeviceCommand::StopStreaming => "stopStreaming",
            DeviceCommand::Ping => "ping",
            DeviceCommand::StartManualControl { .. } => "startManualControl",
            DeviceCommand::ManualControl { .. } => "manualControl",
            DeviceCommand::StopManualControl => "stopManualControl",
        }
    }
}

/// A single sample sent to the device while streaming
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    /// Session-relative time in seconds
    pub time: f64,
    /// Actuator value (0-255 when normalized, otherwise physical units)
    pub value: f64,
}

/// Anything the host can put on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Command(DeviceCommand),
    Data(DataFrame),
}

impl OutboundMessage {
    /// Encode as a JSON text frame
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let text = match self {
            OutboundMessage::Command(cmd) => serde_json::to_string(cmd)?,
            OutboundMessage::Data(frame) => serde_json::to_string(frame)?,
        };
        Ok(text)
    }

    pub fn is_data(&self) -> bool {
        matches!(self, OutboundMessage::Data(_))
    }
}

impl From<DeviceCommand> for OutboundMessage {
    fn from(cmd: DeviceCommand) -> Self {
        OutboundMessage::Command(cmd)
    }
}

impl From<DataFrame> for OutboundMessage {
    fn from(frame: DataFrame) -> Self {
        OutboundMessage::Data(frame)
    }
}

/// Messages the device sends back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceMessage {
    /// Informational status line, no response required
    Status { message: String },
}

impl DeviceMessage {
    /// Parse a text frame received from the device
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
    }
}
