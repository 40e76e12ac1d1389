//! Streaming sessions driven in virtual time

mod common;

use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

use common::{config, init_logging, millis_between, wait_for_status, Endpoint, ScriptedConnector};
use tremorlink_core::api::ProcessingParameters;
use tremorlink_core::datalog::RecordedSample;
use tremorlink_core::demo::{TremorProfile, TremorSimulator};
use tremorlink_core::protocol::{
    ConnectionManager, ConnectionState, DeviceCommand, OutboundMessage, ProtocolError,
};
use tremorlink_core::session::{
    DeviceSink, EngineConfig, SessionError, SessionEvent, StartRequest, StopReason,
    StreamingSession,
};
use tremorlink_core::signal::{ReplayWindow, SignalBundle, StreamSource};

/// Device that keeps everything it is sent
#[derive(Default)]
struct MemoryDevice {
    closed: AtomicBool,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MemoryDevice {
    fn frame_times(&self) -> Vec<f64> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Data(frame) => Some(frame.time),
                _ => None,
            })
            .collect()
    }

    fn commands(&self) -> Vec<DeviceCommand> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Command(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }
}

impl DeviceSink for MemoryDevice {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
        if !self.is_open() {
            return Err(ProtocolError::NotConnected);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// `seconds` of a 100 Hz ramp on a `torque` channel
fn ramp_source(seconds: usize) -> StreamSource {
    let len = seconds * 100;
    let time: Vec<f64> = (0..len).map(|i| i as f64 / 100.0).collect();
    let mut channels = BTreeMap::new();
    channels.insert("torque".to_string(), (0..len).map(|i| i as f64).collect());
    StreamSource::new(Arc::new(SignalBundle::new(time, channels).unwrap()))
}

/// One second at 100 Hz with samples sitting between the 10 ms grid lines
fn offset_grid_source() -> StreamSource {
    let time: Vec<f64> = (0..100).map(|i| i as f64 * 0.01 + 0.005).collect();
    let mut channels = BTreeMap::new();
    channels.insert("torque".to_string(), (0..100).map(|i| i as f64).collect());
    StreamSource::new(Arc::new(SignalBundle::new(time, channels).unwrap()))
}

async fn next_stop(events: &mut broadcast::Receiver<SessionEvent>) -> StopReason {
    loop {
        match events.recv().await.unwrap() {
            SessionEvent::Stopped { reason } => return reason,
            _ => continue,
        }
    }
}

fn assert_times(actual: &[f64], expected: impl Iterator<Item = f64>) {
    let expected: Vec<f64> = expected.collect();
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(&expected).enumerate() {
        assert!((a - e).abs() < 1e-9, "frame {}: {} != {}", i, a, e);
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_pass_runs_twenty_ticks() {
    init_logging();
    let device = Arc::new(MemoryDevice::default());
    let session = StreamingSession::new(Arc::clone(&device), EngineConfig::device(), None);
    session.set_source(ramp_source(1)).await.unwrap();
    let mut events = session.subscribe();
    let started = Instant::now();

    let cadence = session
        .start(StartRequest::new("torque", ReplayWindow::new(0.0, 1.0)))
        .await
        .unwrap();
    assert_eq!(cadence.points_per_batch, 5);
    assert_eq!(cadence.interval, Duration::from_millis(50));

    assert_eq!(next_stop(&mut events).await, StopReason::EndOfWindow);
    // Ticks at 0, 50, ..., 950 ms
    assert_eq!(millis_between(started, Instant::now()), 950);

    assert_times(&device.frame_times(), (0..100).map(|i| i as f64 / 100.0));
    assert_eq!(
        device.commands(),
        vec![
            DeviceCommand::start_streaming(100),
            DeviceCommand::StopStreaming
        ]
    );
    assert!(!session.is_running().await);
    assert_eq!(session.stats().await.messages_sent, 100);
}

#[tokio::test(start_paused = true)]
async fn test_looping_timeline_keeps_increasing() {
    let device = Arc::new(MemoryDevice::default());
    let session = StreamingSession::new(Arc::clone(&device), EngineConfig::device(), None);
    session.set_source(ramp_source(1)).await.unwrap();

    session
        .start(StartRequest::new("torque", ReplayWindow::new(0.0, 1.0)).looping(true))
        .await
        .unwrap();

    // 60 ticks of 5 points cover three traversals
    sleep(Duration::from_millis(2960)).await;
    assert!(session.stop().await);

    assert_times(&device.frame_times(), (0..300).map(|i| i as f64 / 100.0));
}

#[tokio::test(start_paused = true)]
async fn test_single_sample_window_sends_once() {
    let device = Arc::new(MemoryDevice::default());
    let session = StreamingSession::new(Arc::clone(&device), EngineConfig::device(), None);
    session.set_source(offset_grid_source()).await.unwrap();
    let mut events = session.subscribe();
    let started = Instant::now();

    session
        .start(StartRequest::new("torque", ReplayWindow::new(0.0, 0.01)))
        .await
        .unwrap();

    assert_eq!(next_stop(&mut events).await, StopReason::EndOfWindow);
    assert_eq!(millis_between(started, Instant::now()), 0);
    assert_times(&device.frame_times(), std::iter::once(0.005));
    assert_eq!(
        device.commands(),
        vec![
            DeviceCommand::start_streaming(100),
            DeviceCommand::StopStreaming
        ]
    );

    sleep(Duration::from_millis(200)).await;
    assert_eq!(device.frame_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_sample_window_loops() {
    let device = Arc::new(MemoryDevice::default());
    let session = StreamingSession::new(Arc::clone(&device), EngineConfig::device(), None);
    session.set_source(offset_grid_source()).await.unwrap();

    session
        .start(StartRequest::new("torque", ReplayWindow::new(0.0, 0.01)).looping(true))
        .await
        .unwrap();

    // Ticks at 0, 50, 100 and 150 ms, five repeats each
    sleep(Duration::from_millis(160)).await;
    assert!(session.stop().await);

    assert_times(
        &device.frame_times(),
        (0..20).map(|k| 0.005 + k as f64 * 0.01),
    );
    let values: Vec<f64> = device
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter_map(|m| match m {
            OutboundMessage::Data(frame) => Some(frame.value),
            _ => None,
        })
        .collect();
    assert_eq!(values, vec![0.0; 20]);
}

#[tokio::test(start_paused = true)]
async fn test_recording_captures_exact_samples() {
    let device = Arc::new(MemoryDevice::default());
    let session = StreamingSession::new(Arc::clone(&device), EngineConfig::device(), None);
    session.set_source(ramp_source(5)).await.unwrap();

    session
        .start(StartRequest::new("torque", ReplayWindow::new(0.0, 5.0)))
        .await
        .unwrap();

    // Ticks at 100 and 150 ms land inside the recording
    sleep(Duration::from_millis(60)).await;
    session.start_recording().await;
    sleep(Duration::from_millis(100)).await;
    session.stop_recording().await;
    sleep(Duration::from_millis(100)).await;
    assert!(session.stop().await);

    let expected: Vec<RecordedSample> = (10..20)
        .map(|i| RecordedSample::new(i as f64 / 100.0).with_value("torque", i as f64))
        .collect();
    assert_eq!(session.recorded().await, expected);
    assert_eq!(device.frame_times().len(), 30);
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_ticking() {
    let device = Arc::new(MemoryDevice::default());
    let session = StreamingSession::new(Arc::clone(&device), EngineConfig::device(), None);
    session.set_source(ramp_source(5)).await.unwrap();
    let mut events = session.subscribe();

    session
        .start(StartRequest::new("torque", ReplayWindow::new(0.0, 5.0)))
        .await
        .unwrap();
    sleep(Duration::from_millis(120)).await;

    assert!(session.stop().await);
    assert!(!session.stop().await);
    assert_eq!(next_stop(&mut events).await, StopReason::Manual);

    let sent = device.frame_times().len();
    assert_eq!(sent, 15);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(device.frame_times().len(), sent);
    assert_eq!(device.commands().last(), Some(&DeviceCommand::StopStreaming));
}

#[tokio::test(start_paused = true)]
async fn test_restart_continues_timeline() {
    let device = Arc::new(MemoryDevice::default());
    let session = StreamingSession::new(Arc::clone(&device), EngineConfig::device(), None);
    session.set_source(ramp_source(1)).await.unwrap();
    let mut events = session.subscribe();
    let request = StartRequest::new("torque", ReplayWindow::new(0.0, 1.0));

    session.start(request.clone()).await.unwrap();
    next_stop(&mut events).await;
    session.start(request).await.unwrap();
    next_stop(&mut events).await;

    assert_times(&device.frame_times(), (0..200).map(|i| i as f64 / 100.0));

    session.reset().await;
    let stats = session.stats().await;
    assert_eq!(stats.session_offset, 0.0);
    assert_eq!(stats.messages_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_is_rejected() {
    let device = Arc::new(MemoryDevice::default());
    let session = StreamingSession::new(Arc::clone(&device), EngineConfig::device(), None);

    assert!(matches!(
        session.start(StartRequest::default()).await,
        Err(SessionError::NoData)
    ));

    session.set_source(ramp_source(1)).await.unwrap();
    let request = StartRequest::new("torque", ReplayWindow::new(0.0, 1.0));
    session.start(request.clone()).await.unwrap();
    assert!(matches!(
        session.start(request).await,
        Err(SessionError::AlreadyRunning)
    ));
    assert!(matches!(
        session.set_source(ramp_source(2)).await,
        Err(SessionError::Busy)
    ));
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_closed_device_refuses_start() {
    let device = Arc::new(MemoryDevice::default());
    device.closed.store(true, Ordering::SeqCst);
    let session = StreamingSession::new(Arc::clone(&device), EngineConfig::device(), None);
    session.set_source(ramp_source(1)).await.unwrap();

    assert!(matches!(
        session
            .start(StartRequest::new("torque", ReplayWindow::new(0.0, 1.0)))
            .await,
        Err(SessionError::NotConnected)
    ));
    assert!(device.sent.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_device_drop_stops_session() {
    init_logging();
    let connector = ScriptedConnector::new(&[("ws://device", Endpoint::Accept)]);
    let manager = ConnectionManager::create(config(&["ws://device"]), connector.clone());
    let mut status = manager.handle().watch_status();
    manager.connect();
    wait_for_status(&mut status, |s| s.is_open()).await;

    let session = StreamingSession::with_connection(manager.handle(), EngineConfig::device());
    session.set_source(ramp_source(10)).await.unwrap();
    let mut events = session.subscribe();
    session
        .start(StartRequest::new("torque", ReplayWindow::new(0.0, 10.0)).recording(true))
        .await
        .unwrap();

    sleep(Duration::from_millis(220)).await;
    let peer = connector.last_peer();
    peer.close(1006);

    let reason = timeout(Duration::from_millis(50), next_stop(&mut events))
        .await
        .expect("session kept running after the device dropped");
    assert_eq!(reason, StopReason::ConnectionLost);
    assert!(!session.is_running().await);

    let recorded = session.recorded().await.len();
    assert_eq!(recorded, 25);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(session.recorded().await.len(), recorded);

    // startStreaming plus one frame per recorded sample, no stopStreaming
    let sent = peer.sent_json();
    assert_eq!(sent.len(), recorded + 1);
    assert_eq!(sent[0]["command"], "startStreaming");
    assert_eq!(sent[0]["samplingRate"], 100);

    // The manager schedules its own reconnect
    assert_eq!(manager.status().state, ConnectionState::Closed);
    wait_for_status(&mut status, |s| s.is_open()).await;
    assert_eq!(connector.attempt_count(), 2);

    session.shutdown().await;
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_replaced_link_stops_session() {
    let connector = ScriptedConnector::new(&[
        ("ws://a", Endpoint::Accept),
        ("ws://b", Endpoint::Accept),
    ]);
    let manager = ConnectionManager::create(config(&["ws://a", "ws://b"]), connector.clone());
    let mut status = manager.handle().watch_status();
    manager.connect();
    wait_for_status(&mut status, |s| s.is_open()).await;
    let first = connector.last_peer();

    let session = StreamingSession::with_connection(manager.handle(), EngineConfig::device());
    session.set_source(ramp_source(10)).await.unwrap();
    let mut events = session.subscribe();
    session
        .start(StartRequest::new("torque", ReplayWindow::new(0.0, 10.0)).recording(true))
        .await
        .unwrap();

    sleep(Duration::from_millis(120)).await;
    manager.reconnect();

    let reason = timeout(Duration::from_millis(50), next_stop(&mut events))
        .await
        .expect("session kept streaming onto the new link");
    assert_eq!(reason, StopReason::ConnectionLost);
    assert!(!session.is_running().await);

    sleep(Duration::from_millis(300)).await;
    let reopened = manager.status();
    assert!(reopened.is_open());
    assert_eq!(reopened.endpoint.as_deref(), Some("ws://b"));
    assert_eq!(connector.peer_count(), 2);

    // Everything went to the first link; the replacement saw nothing
    let recorded = session.recorded().await.len();
    assert_eq!(recorded, 15);
    assert_eq!(first.sent_json().len(), recorded + 1);
    assert!(connector.last_peer().sent().is_empty());

    session.shutdown().await;
    manager.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_offline_demo_session_exports_csv() {
    let bundle = TremorSimulator::seeded(TremorProfile::default(), 11)
        .generate(2.0, &ProcessingParameters::default())
        .unwrap();
    let session = StreamingSession::offline(EngineConfig::simulation());
    session
        .set_source(StreamSource::new(Arc::new(bundle)))
        .await
        .unwrap();
    let mut events = session.subscribe();

    let cadence = session
        .start(StartRequest::default().recording(true))
        .await
        .unwrap();
    assert_eq!(cadence.points_per_batch, 10);
    assert_eq!(next_stop(&mut events).await, StopReason::EndOfWindow);

    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("demo.csv");
    assert_eq!(session.export_csv(&path).await.unwrap(), 200);

    let csv = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 201);
    assert_eq!(lines[0], "time,centeredTorque");
    assert!(lines[1].starts_with("0,"));
}

#[tokio::test(start_paused = true)]
async fn test_export_without_recording_fails() {
    let session = StreamingSession::offline(EngineConfig::simulation());
    let temp = tempfile::tempdir().unwrap();
    assert!(matches!(
        session.export_csv(temp.path().join("empty.csv")).await,
        Err(SessionError::NoData)
    ));
}
