//! Connection management
//!
//! Owns the single live link to the haptic device. A background task holds
//! the socket and every timer that belongs to it (connect timeout, reconnect
//! backoff, keepalive, watchdog); callers talk to it through a cloneable
//! [`ConnectionHandle`].
//!
//! Endpoints are tried in rotation. Any close that was not requested by us
//! schedules a reconnect after `min(base * factor^attempt, max)`, and a
//! watchdog forces a fresh attempt whenever the link is not open, so the
//! manager keeps looking for the device indefinitely.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior, Sleep};

use super::transport::{Connector, DeviceLink, LinkEvent};
use super::{
    DeviceCommand, DeviceMessage, OutboundMessage, ProtocolError, DEFAULT_BACKOFF_FACTOR,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_KEEPALIVE_SECS, DEFAULT_RECONNECT_BASE_MS,
    DEFAULT_RECONNECT_MAX_MS, DEFAULT_SEND_TIMEOUT_MS, DEFAULT_WATCHDOG_SECS, NORMAL_CLOSURE,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// An attempt is in flight
    Connecting,
    /// Connected and ready
    Open,
    /// Not connected (possibly waiting to retry)
    Closed,
}

/// Snapshot of the manager published on every transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Endpoint of the current or last attempt
    pub endpoint: Option<String>,
    /// Index of the endpoint the next attempt will use
    pub next_endpoint_index: usize,
    /// Consecutive failed attempts since the last successful open
    pub reconnect_attempt: u32,
    /// Bumped every time a link opens; a change means the device saw a
    /// fresh connection
    pub link_generation: u64,
    /// Human readable status line for the UI
    pub message: String,
}

impl ConnectionStatus {
    fn initial() -> Self {
        Self {
            state: ConnectionState::Closed,
            endpoint: None,
            next_endpoint_index: 0,
            reconnect_attempt: 0,
            link_generation: 0,
            message: "Not connected".to_string(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Candidate endpoints in priority order
    pub endpoints: Vec<String>,
    /// How long a single attempt may take before it is abandoned
    pub connect_timeout: Duration,
    /// First reconnect delay
    pub reconnect_base_delay: Duration,
    /// Upper bound on the reconnect delay
    pub reconnect_max_delay: Duration,
    /// Growth factor applied per failed attempt
    pub backoff_factor: f64,
    /// Keepalive ping period while open
    pub keepalive_interval: Duration,
    /// Period of the "not open, try again" watchdog
    pub watchdog_interval: Duration,
    /// Upper bound on a single frame write
    pub send_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoints: super::default_endpoints(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            reconnect_base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            reconnect_max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            watchdog_interval: Duration::from_secs(DEFAULT_WATCHDOG_SECS),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        }
    }
}

impl ConnectionConfig {
    /// Config with the default timings and the given endpoints
    pub fn with_endpoints(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Self::default()
        }
    }

    /// Reconnect delay after `attempt` consecutive failures
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.reconnect_base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.reconnect_max_delay.as_secs_f64() * 1000.0;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = (base_ms * self.backoff_factor.powi(exponent)).min(max_ms);
        Duration::from_micros((delay_ms * 1000.0).round() as u64)
    }
}

enum ManagerCommand {
    /// A frame meant for the link with the given generation
    Send { text: String, generation: u64 },
    Connect,
    Reconnect,
    Disconnect,
    Dispose,
}

/// Cloneable capability to observe and use the connection
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    status: watch::Receiver<ConnectionStatus>,
    messages: broadcast::Sender<DeviceMessage>,
}

impl ConnectionHandle {
    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Latest status snapshot
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Receiver for messages sent by the device
    pub fn subscribe_messages(&self) -> broadcast::Receiver<DeviceMessage> {
        self.messages.subscribe()
    }

    /// Queue a message for the device.
    ///
    /// Fails (and logs) when the link is not open; delivery is never
    /// guaranteed, callers check state before relying on it.
    pub fn send(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
        if !self.is_open() {
            if message.is_data() {
                tracing::debug!("Dropping data frame, device not connected");
            } else {
                tracing::warn!("Device not connected, cannot send {:?}", message);
            }
            return Err(ProtocolError::NotConnected);
        }
        let text = message.to_json()?;
        let generation = self.status.borrow().link_generation;
        self.commands
            .send(ManagerCommand::Send { text, generation })
            .map_err(|_| ProtocolError::Closed)
    }

    /// Send a control command
    pub fn send_command(&self, command: DeviceCommand) -> Result<(), ProtocolError> {
        self.send(&OutboundMessage::Command(command))
    }

    /// Start connecting (and arm the watchdog)
    pub fn connect(&self) {
        self.request(ManagerCommand::Connect);
    }

    /// Immediate fresh attempt, bypassing backoff
    pub fn reconnect(&self) {
        tracing::info!("Manual reconnection requested");
        self.request(ManagerCommand::Reconnect);
    }

    /// Intentional close; no automatic reconnect follows
    pub fn disconnect(&self) {
        self.request(ManagerCommand::Disconnect);
    }

    fn request(&self, command: ManagerCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Connection manager is no longer running");
        }
    }
}

/// Owner of the device connection
///
/// Created once per session context. Dropping the manager aborts its task;
/// [`ConnectionManager::dispose`] closes the link cleanly first.
pub struct ConnectionManager {
    handle: ConnectionHandle,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Spawn the manager task. Nothing is attempted until `connect()`.
    pub fn create(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::initial());
        let (message_tx, _) = broadcast::channel(64);

        let worker = Worker {
            connector,
            config,
            commands: command_rx,
            status: status_tx,
            messages: message_tx.clone(),
            endpoint_index: 0,
            reconnect_attempt: 0,
            link_generation: 0,
            current_endpoint: None,
            pending: None,
            connect_deadline: None,
            reconnect_timer: None,
            link: None,
            keepalive: None,
            watchdog: None,
        };
        let task = tokio::spawn(worker.run());

        Self {
            handle: ConnectionHandle {
                commands: command_tx,
                status: status_rx,
                messages: message_tx,
            },
            task: Some(task),
        }
    }

    /// A handle for other components
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn connect(&self) {
        self.handle.connect();
    }

    pub fn reconnect(&self) {
        self.handle.reconnect();
    }

    pub fn disconnect(&self) {
        self.handle.disconnect();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.handle.status()
    }

    /// Close the link and stop the manager task, cancelling every timer
    pub async fn dispose(mut self) {
        let _ = self.handle.commands.send(ManagerCommand::Dispose);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!("Connection manager task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

type PendingConnect = BoxFuture<'static, Result<Box<dyn DeviceLink>, ProtocolError>>;

struct Worker {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    commands: mpsc::UnboundedReceiver<ManagerCommand>,
    status: watch::Sender<ConnectionStatus>,
    messages: broadcast::Sender<DeviceMessage>,
    endpoint_index: usize,
    reconnect_attempt: u32,
    link_generation: u64,
    current_endpoint: Option<String>,
    pending: Option<PendingConnect>,
    connect_deadline: Option<Pin<Box<Sleep>>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    link: Option<Box<dyn DeviceLink>>,
    keepalive: Option<Interval>,
    watchdog: Option<Interval>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command).await,
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
                result = poll_pending(&mut self.pending) => {
                    self.pending = None;
                    self.connect_deadline = None;
                    match result {
                        Ok(link) => self.on_open(link),
                        Err(e) => self.on_attempt_failed(e),
                    }
                }
                _ = sleep_until_set(&mut self.connect_deadline) => {
                    self.on_connect_timeout();
                }
                event = recv_link(&mut self.link) => {
                    self.on_link_event(event);
                }
                _ = sleep_until_set(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.reconnect_attempt += 1;
                    self.start_attempt().await;
                }
                _ = tick_if_set(&mut self.keepalive) => {
                    self.send_keepalive().await;
                }
                _ = tick_if_set(&mut self.watchdog) => {
                    if self.status.borrow().state != ConnectionState::Open {
                        tracing::info!("Watchdog: device not connected, forcing a fresh attempt");
                        self.start_attempt().await;
                    }
                }
            }
        }

        self.close_intentionally("Disconnected").await;
        tracing::debug!("Connection manager stopped");
    }

    /// Returns false when the worker should exit
    async fn handle_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::Send { text, generation } => {
                if generation == self.link_generation {
                    self.send_text(text).await;
                } else {
                    tracing::debug!("Dropping frame queued for a replaced link");
                }
            }
            ManagerCommand::Connect => {
                self.arm_watchdog();
                let state = self.status.borrow().state;
                if state == ConnectionState::Closed && self.reconnect_timer.is_none() {
                    self.start_attempt().await;
                }
            }
            ManagerCommand::Reconnect => {
                self.arm_watchdog();
                self.start_attempt().await;
            }
            ManagerCommand::Disconnect => {
                self.watchdog = None;
                self.close_intentionally("Disconnected").await;
            }
            ManagerCommand::Dispose => {
                self.watchdog = None;
                return false;
            }
        }
        true
    }

    fn arm_watchdog(&mut self) {
        if self.watchdog.is_none() {
            let period = self.config.watchdog_interval;
            let mut watchdog = interval_at(Instant::now() + period, period);
            watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.watchdog = Some(watchdog);
        }
    }

    /// Tear down anything in flight and try the next endpoint
    async fn start_attempt(&mut self) {
        self.pending = None;
        self.connect_deadline = None;
        self.reconnect_timer = None;
        self.keepalive = None;
        if let Some(mut link) = self.link.take() {
            tracing::debug!("Closing existing link before reconnecting");
            link.close(NORMAL_CLOSURE).await;
        }

        if self.config.endpoints.is_empty() {
            tracing::error!("No device endpoints configured");
            self.publish(ConnectionState::Closed, "No device endpoints configured");
            return;
        }

        let index = self.endpoint_index % self.config.endpoints.len();
        let url = self.config.endpoints[index].clone();
        self.endpoint_index = (index + 1) % self.config.endpoints.len();
        self.current_endpoint = Some(url.clone());

        tracing::info!(
            "Attempting device connection (attempt {}) to {}",
            self.reconnect_attempt + 1,
            url
        );
        self.publish(ConnectionState::Connecting, format!("Connecting to {}...", url));

        let connector = Arc::clone(&self.connector);
        self.pending = Some(Box::pin(async move { connector.connect(&url).await }));
        self.connect_deadline = Some(Box::pin(sleep(self.config.connect_timeout)));
    }

    fn on_open(&mut self, link: Box<dyn DeviceLink>) {
        tracing::info!(
            "Device connected at {}",
            self.current_endpoint.as_deref().unwrap_or("?")
        );
        self.link = Some(link);
        self.reconnect_attempt = 0;
        self.link_generation += 1;

        let period = self.config.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keepalive = Some(keepalive);

        self.publish(ConnectionState::Open, "Connected to haptic device");
    }

    fn on_attempt_failed(&mut self, error: ProtocolError) {
        tracing::warn!("Device connection attempt failed: {}", error);
        self.publish(ConnectionState::Closed, "Disconnected. Retrying...");
        self.schedule_reconnect();
    }

    fn on_connect_timeout(&mut self) {
        tracing::warn!(
            "Connection to {} timed out, trying next endpoint",
            self.current_endpoint.as_deref().unwrap_or("?")
        );
        self.pending = None;
        self.connect_deadline = None;
        self.publish(ConnectionState::Closed, "Connection timed out. Retrying...");
        self.schedule_reconnect();
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Text(text) => match DeviceMessage::parse(&text) {
                Ok(message) => {
                    let DeviceMessage::Status { message: line } = &message;
                    tracing::info!("Device status: {}", line);
                    // No subscribers is fine
                    let _ = self.messages.send(message);
                }
                Err(e) => tracing::warn!("Ignoring device frame {:?}: {}", text, e),
            },
            closed => {
                self.link = None;
                self.keepalive = None;
                if closed.is_normal_closure() {
                    tracing::info!("Device closed the connection normally");
                    self.publish(ConnectionState::Closed, "Disconnected");
                } else {
                    tracing::warn!("Device connection lost: {:?}", closed);
                    self.publish(ConnectionState::Closed, "Connection lost. Retrying...");
                    self.schedule_reconnect();
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) {
        let Some(link) = self.link.as_mut() else {
            tracing::debug!("Dropping outbound frame, link not open");
            return;
        };
        let error = match timeout(self.config.send_timeout, link.send_text(text)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(_) => ProtocolError::Timeout,
        };
        tracing::error!("Device send failed: {}", error);
        self.on_link_event(LinkEvent::Error(error.to_string()));
    }

    async fn send_keepalive(&mut self) {
        match OutboundMessage::Command(DeviceCommand::Ping).to_json() {
            Ok(text) => {
                tracing::debug!("Sending keepalive ping");
                self.send_text(text).await;
            }
            Err(e) => tracing::error!("Failed to encode ping: {}", e),
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.config.backoff_delay(self.reconnect_attempt);
        tracing::debug!("Scheduling reconnection attempt in {:?}", delay);
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
    }

    async fn close_intentionally(&mut self, message: &str) {
        self.pending = None;
        self.connect_deadline = None;
        self.reconnect_timer = None;
        self.keepalive = None;
        if let Some(mut link) = self.link.take() {
            link.close(NORMAL_CLOSURE).await;
            tracing::info!("Device connection closed");
        }
        self.publish(ConnectionState::Closed, message);
    }

    fn publish(&self, state: ConnectionState, message: impl Into<String>) {
        let status = ConnectionStatus {
            state,
            endpoint: self.current_endpoint.clone(),
            next_endpoint_index: self.endpoint_index,
            reconnect_attempt: self.reconnect_attempt,
            link_generation: self.link_generation,
            message: message.into(),
        };
        self.status.send_replace(status);
    }
}

async fn poll_pending(
    pending: &mut Option<PendingConnect>,
) -> Result<Box<dyn DeviceLink>, ProtocolError> {
    match pending {
        Some(fut) => fut.await,
        None => pending_forever().await,
    }
}

async fn sleep_until_set(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending_forever().await,
    }
}

async fn tick_if_set(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending_forever().await,
    }
}

async fn recv_link(link: &mut Option<Box<dyn DeviceLink>>) -> LinkEvent {
    match link {
        Some(link) => link.recv().await,
        None => pending_forever().await,
    }
}

async fn pending_forever<T>() -> T {
    pending().await
}
