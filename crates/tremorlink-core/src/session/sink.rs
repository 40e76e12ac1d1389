//! Where streamed frames go

use tracing::trace;

use crate::protocol::{ConnectionHandle, OutboundMessage, ProtocolError};

/// Destination of outbound messages for a streaming session
pub trait DeviceSink: Send + Sync {
    /// Whether messages can be sent right now
    fn is_open(&self) -> bool;

    /// Send one message
    fn send(&self, message: &OutboundMessage) -> Result<(), ProtocolError>;

    /// False for sinks that stand in for a device. Sessions on such sinks
    /// neither require an open connection nor stop when one drops.
    fn requires_connection(&self) -> bool {
        true
    }
}

impl DeviceSink for ConnectionHandle {
    fn is_open(&self) -> bool {
        ConnectionHandle::is_open(self)
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
        ConnectionHandle::send(self, message)
    }
}

/// Sink for offline/debug sessions: accepts and discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DeviceSink for NullSink {
    fn is_open(&self) -> bool {
        true
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
        trace!("Offline sink dropped {:?}", message);
        Ok(())
    }

    fn requires_connection(&self) -> bool {
        false
    }
}

impl<D: DeviceSink + ?Sized> DeviceSink for std::sync::Arc<D> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
        (**self).send(message)
    }

    fn requires_connection(&self) -> bool {
        (**self).requires_connection()
    }
}
