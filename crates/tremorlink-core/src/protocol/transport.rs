//! Transport abstraction
//!
//! The connection manager only needs to open a link to a URL, push text
//! frames and wait for the next inbound event. WebSocket is the production
//! transport; tests plug in scripted links.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{ProtocolError, NORMAL_CLOSURE};

/// Inbound event on an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame from the device
    Text(String),
    /// The peer closed the link (code is absent when the socket just dropped)
    Closed { code: Option<u16>, reason: String },
    /// Transport-level failure; the link is unusable afterwards
    Error(String),
}

impl LinkEvent {
    /// Whether this event ends the link with a normal closure
    pub fn is_normal_closure(&self) -> bool {
        matches!(self, LinkEvent::Closed { code: Some(code), .. } if *code == NORMAL_CLOSURE)
    }
}

/// An open, bidirectional link to the device
#[async_trait]
pub trait DeviceLink: Send {
    /// Send one text frame
    async fn send_text(&mut self, text: String) -> Result<(), ProtocolError>;

    /// Wait for the next inbound event. Must be cancel safe.
    async fn recv(&mut self) -> LinkEvent;

    /// Close the link with the given close code
    async fn close(&mut self, code: u16);
}

/// Opens links to device endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn DeviceLink>, ProtocolError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket link built on tokio-tungstenite
pub struct WebSocketLink {
    stream: WsStream,
}

impl WebSocketLink {
    pub fn new(stream: WsStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl DeviceLink for WebSocketLink {
    async fn send_text(&mut self, text: String) -> Result<(), ProtocolError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ProtocolError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> LinkEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return LinkEvent::Text(text.as_str().to_string()),
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => LinkEvent::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.as_str().to_string(),
                        },
                        None => LinkEvent::Closed {
                            code: None,
                            reason: String::new(),
                        },
                    };
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::warn!("Ignoring {} byte binary frame from device", data.len());
                }
                // Ping/Pong are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => return LinkEvent::Error(e.to_string()),
                None => {
                    return LinkEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    }
                }
            }
        }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::debug!("WebSocket close returned error: {}", e);
        }
    }
}

/// Connector for `ws://` endpoints
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn DeviceLink>, ProtocolError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| ProtocolError::ConnectionFailed(format!("{}: {}", url, e)))?;
        Ok(Box::new(WebSocketLink::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_closure_detection() {
        let normal = LinkEvent::Closed {
            code: Some(NORMAL_CLOSURE),
            reason: String::new(),
        };
        let abnormal = LinkEvent::Closed {
            code: Some(1006),
            reason: String::new(),
        };
        let dropped = LinkEvent::Closed {
            code: None,
            reason: String::new(),
        };

        assert!(normal.is_normal_closure());
        assert!(!abnormal.is_normal_closure());
        assert!(!dropped.is_normal_closure());
        assert!(!LinkEvent::Error("reset".into()).is_normal_closure());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails() {
        // Port 9 on localhost is the discard service and almost never listening
        let result = WebSocketConnector.connect("ws://127.0.0.1:9").await;
        assert!(matches!(result, Err(ProtocolError::ConnectionFailed(_))));
    }
}
