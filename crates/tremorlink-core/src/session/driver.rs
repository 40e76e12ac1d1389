//! Session driver
//!
//! Runs a [`StreamingEngine`] on a tokio interval and stops it when the
//! device link it started on closes or is replaced.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::clock::Cadence;
use super::engine::{EngineConfig, SessionStats, StartRequest, StopReason, StreamingEngine, TickOutcome};
use super::sink::{DeviceSink, NullSink};
use super::SessionError;
use crate::datalog::{write_csv, RecordMode, RecordedSample};
use crate::protocol::{ConnectionHandle, ConnectionStatus};
use crate::signal::StreamSource;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started { cadence: Cadence },
    Stopped { reason: StopReason },
    Reset,
}

/// A streaming engine plus the task that ticks it
pub struct StreamingSession<D: DeviceSink + 'static> {
    engine: Arc<Mutex<StreamingEngine<D>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    connection: Option<watch::Receiver<ConnectionStatus>>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl StreamingSession<ConnectionHandle> {
    /// Session streaming to a managed device connection
    pub fn with_connection(handle: ConnectionHandle, config: EngineConfig) -> Self {
        let status = handle.watch_status();
        Self::new(handle, config, Some(status))
    }
}

impl StreamingSession<NullSink> {
    /// Session that runs the full pipeline without a device
    pub fn offline(config: EngineConfig) -> Self {
        Self::new(NullSink, config, None)
    }
}

impl<D: DeviceSink + 'static> StreamingSession<D> {
    /// `connection` is watched while running; leaving the open state or
    /// opening a different link stops the session.
    pub fn new(
        device: D,
        config: EngineConfig,
        connection: Option<watch::Receiver<ConnectionStatus>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engine: Arc::new(Mutex::new(StreamingEngine::new(device, config))),
            ticker: Mutex::new(None),
            connection,
            events,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn set_source(&self, source: StreamSource) -> Result<(), SessionError> {
        self.engine.lock().await.set_source(source)
    }

    pub async fn set_record_mode(&self, mode: RecordMode) -> Result<(), SessionError> {
        self.engine.lock().await.set_record_mode(mode)
    }

    /// Start streaming and spawn the tick task
    pub async fn start(&self, request: StartRequest) -> Result<Cadence, SessionError> {
        let mut ticker = self.ticker.lock().await;
        let link = self.connection.clone().map(LinkWatch::new);
        let cadence = self.engine.lock().await.start(request)?;

        if let Some(stale) = ticker.take() {
            stale.abort();
        }
        let _ = self.events.send(SessionEvent::Started { cadence });

        *ticker = Some(tokio::spawn(run_ticker(
            Arc::clone(&self.engine),
            cadence,
            link,
            self.events.clone(),
            self.shutdown.child_token(),
        )));
        Ok(cadence)
    }

    /// Stop streaming. The engine goes idle before the tick task is torn
    /// down, so no tick can run after this returns.
    pub async fn stop(&self) -> bool {
        let mut ticker = self.ticker.lock().await;
        let stopped = self.engine.lock().await.stop();
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
        if stopped {
            let _ = self.events.send(SessionEvent::Stopped {
                reason: StopReason::Manual,
            });
        }
        stopped
    }

    /// Stop, then clear plotted/recorded data and session offsets
    pub async fn reset(&self) {
        let mut ticker = self.ticker.lock().await;
        self.engine.lock().await.reset();
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
        let _ = self.events.send(SessionEvent::Reset);
    }

    pub async fn start_recording(&self) {
        self.engine.lock().await.start_recording();
    }

    pub async fn stop_recording(&self) {
        self.engine.lock().await.stop_recording();
    }

    pub async fn is_running(&self) -> bool {
        self.engine.lock().await.is_running()
    }

    pub async fn stats(&self) -> SessionStats {
        self.engine.lock().await.stats()
    }

    /// Copy of everything recorded so far
    pub async fn recorded(&self) -> Vec<RecordedSample> {
        self.engine.lock().await.recorded().to_vec()
    }

    /// Write the recording to a CSV file; returns the number of rows
    pub async fn export_csv(&self, path: impl AsRef<Path>) -> Result<usize, SessionError> {
        let samples = self.recorded().await;
        if samples.is_empty() {
            return Err(SessionError::NoData);
        }
        write_csv(path.as_ref(), &samples)?;
        info!("Exported {} samples to {}", samples.len(), path.as_ref().display());
        Ok(samples.len())
    }

    /// Run a closure against the engine
    pub async fn inspect<R>(&self, f: impl FnOnce(&StreamingEngine<D>) -> R) -> R {
        f(&*self.engine.lock().await)
    }

    /// Stop streaming and cancel every task this session spawned
    pub async fn shutdown(&self) {
        self.stop().await;
        self.shutdown.cancel();
    }
}

impl<D: DeviceSink + 'static> Drop for StreamingSession<D> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_ticker<D: DeviceSink + 'static>(
    engine: Arc<Mutex<StreamingEngine<D>>>,
    cadence: Cadence,
    mut link: Option<LinkWatch>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
) {
    let mut interval = time::interval(cadence.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                engine.lock().await.stop();
                break;
            }
            _ = interval.tick() => {
                if link.as_ref().is_some_and(|link| !link.is_current()) {
                    stop_on_lost_link(&engine, &events).await;
                    break;
                }
                let outcome = engine.lock().await.tick(Instant::now());
                match outcome {
                    TickOutcome::Sent(_) => {}
                    TickOutcome::Finished(_) => {
                        let _ = events.send(SessionEvent::Stopped { reason: StopReason::EndOfWindow });
                        break;
                    }
                    TickOutcome::Halted(reason) => {
                        let _ = events.send(SessionEvent::Stopped { reason });
                        break;
                    }
                    TickOutcome::Idle => break,
                }
            }
            _ = link_lost(&mut link) => {
                stop_on_lost_link(&engine, &events).await;
                break;
            }
        }
    }
    debug!("Tick task finished");
}

async fn stop_on_lost_link<D: DeviceSink + 'static>(
    engine: &Mutex<StreamingEngine<D>>,
    events: &broadcast::Sender<SessionEvent>,
) {
    if engine.lock().await.connection_lost() {
        let _ = events.send(SessionEvent::Stopped { reason: StopReason::ConnectionLost });
    }
}

/// The device link a run was started on
struct LinkWatch {
    status: watch::Receiver<ConnectionStatus>,
    generation: u64,
}

impl LinkWatch {
    fn new(status: watch::Receiver<ConnectionStatus>) -> Self {
        let generation = status.borrow().link_generation;
        Self { status, generation }
    }

    /// Still open, and not replaced by a newer link
    fn is_current(&self) -> bool {
        let status = self.status.borrow();
        status.is_open() && status.link_generation == self.generation
    }
}

/// Resolves once the watched link closes or is replaced. Never resolves
/// when nothing is watched.
async fn link_lost(link: &mut Option<LinkWatch>) {
    let Some(link) = link.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        let _ = link.status.borrow_and_update();
        if !link.is_current() {
            return;
        }
        if link.status.changed().await.is_err() {
            return;
        }
    }
}
