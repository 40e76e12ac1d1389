//! Scripted device endpoints shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};

use tremorlink_core::protocol::{
    ConnectionConfig, ConnectionStatus, Connector, DeviceLink, LinkEvent, ProtocolError,
};

/// What an endpoint does when dialled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Never answers; the attempt can only time out
    Unresponsive,
    /// Fails straight away
    Refuse,
    /// Opens a link
    Accept,
}

/// Remote side of an accepted link
#[derive(Clone)]
pub struct Peer {
    events: mpsc::UnboundedSender<LinkEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_with: Arc<Mutex<Option<u16>>>,
    stalled: Arc<AtomicBool>,
}

impl Peer {
    pub fn push(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    /// Close from the device side
    pub fn close(&self, code: u16) {
        self.push(LinkEvent::Closed {
            code: Some(code),
            reason: String::new(),
        });
    }

    /// Every text frame the host sent on this link
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// Make every later host write hang, like a peer that stopped reading
    pub fn stall_sends(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Close code the host used, if it closed the link
    pub fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock().unwrap()
    }
}

struct ScriptedLink {
    events: mpsc::UnboundedReceiver<LinkEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_with: Arc<Mutex<Option<u16>>>,
    stalled: Arc<AtomicBool>,
}

#[async_trait]
impl DeviceLink for ScriptedLink {
    async fn send_text(&mut self, text: String) -> Result<(), ProtocolError> {
        if self.stalled.load(Ordering::SeqCst) {
            pending::<()>().await;
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> LinkEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => pending().await,
        }
    }

    async fn close(&mut self, code: u16) {
        *self.closed_with.lock().unwrap() = Some(code);
    }
}

/// Connector answering each URL according to a script
#[derive(Default)]
pub struct ScriptedConnector {
    endpoints: HashMap<String, Endpoint>,
    attempts: Mutex<Vec<(String, Instant)>>,
    peers: Mutex<Vec<Peer>>,
}

impl ScriptedConnector {
    pub fn new(endpoints: &[(&str, Endpoint)]) -> Arc<Self> {
        Arc::new(Self {
            endpoints: endpoints
                .iter()
                .map(|(url, behavior)| (url.to_string(), *behavior))
                .collect(),
            ..Self::default()
        })
    }

    /// URLs dialled so far with the time of each attempt
    pub fn attempts(&self) -> Vec<(String, Instant)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// The most recently accepted link
    pub fn last_peer(&self) -> Peer {
        self.peers.lock().unwrap().last().cloned().expect("no link accepted")
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn DeviceLink>, ProtocolError> {
        self.attempts
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        match self.endpoints.get(url).copied().unwrap_or(Endpoint::Refuse) {
            Endpoint::Unresponsive => pending().await,
            Endpoint::Refuse => Err(ProtocolError::ConnectionFailed(format!("{} refused", url))),
            Endpoint::Accept => {
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let sent = Arc::new(Mutex::new(Vec::new()));
                let closed_with = Arc::new(Mutex::new(None));
                let stalled = Arc::new(AtomicBool::new(false));
                self.peers.lock().unwrap().push(Peer {
                    events: events_tx,
                    sent: Arc::clone(&sent),
                    closed_with: Arc::clone(&closed_with),
                    stalled: Arc::clone(&stalled),
                });
                Ok(Box::new(ScriptedLink {
                    events: events_rx,
                    sent,
                    closed_with,
                    stalled,
                }))
            }
        }
    }
}

/// Default timings with the given endpoints
pub fn config(endpoints: &[&str]) -> ConnectionConfig {
    ConnectionConfig::with_endpoints(endpoints.iter().map(|e| e.to_string()).collect())
}

/// Wait (in virtual time) until the status satisfies `predicate`
pub async fn wait_for_status(
    status: &mut watch::Receiver<ConnectionStatus>,
    predicate: impl Fn(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    timeout(Duration::from_secs(60), async {
        loop {
            let current = status.borrow_and_update().clone();
            if predicate(&current) {
                return current;
            }
            status.changed().await.expect("connection manager stopped");
        }
    })
    .await
    .expect("status never reached")
}

/// Milliseconds between two instants, rounded
pub fn millis_between(from: Instant, to: Instant) -> u64 {
    (to.duration_since(from).as_secs_f64() * 1000.0).round() as u64
}

/// Route tracing output to the test harness (`RUST_LOG=debug cargo test`)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
