//! tremorlink: stream tremor recordings to a haptic actuator from the
//! command line

mod args;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, sleep, timeout};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use args::{CaseCommand, CliArgs, Command, StreamCommand};
use tremorlink_core::api::{BackendClient, CaseStudy};
use tremorlink_core::config::TremorLinkConfig;
use tremorlink_core::datalog::{export_filename, ExportMetadata, RecordedSample};
use tremorlink_core::demo::{TremorProfile, TremorSimulator};
use tremorlink_core::manual::ManualControl;
use tremorlink_core::protocol::{
    ConnectionHandle, ConnectionManager, DeviceMessage, WebSocketConnector,
};
use tremorlink_core::session::{
    case_study_request, DeviceSink, EngineConfig, SessionEvent, StartRequest, StreamingSession,
    CASE_STUDY_PLOT_CAPACITY,
};
use tremorlink_core::signal::{NormalizedChannels, ReplayWindow, SignalBundle, StreamSource};

/// How long to wait for the device before giving up
const CONNECT_WAIT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tremorlink=info,tremorlink_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    let mut config = TremorLinkConfig::resolve(args.config.as_deref())
        .context("Failed to load settings")?;
    args.apply(&mut config);
    config.validate()?;

    match args.command.clone() {
        Command::Files { processed } => list_files(&config, processed).await,
        Command::Stream(cmd) => stream(&config, cmd).await,
        Command::Case(cmd) => play_case(&config, cmd).await,
        Command::Cases { assign, file } => cases(&config, assign, file).await,
        Command::Manual { value, hold } => manual(&config, value, hold).await,
        Command::Status { wait } => status(&config, wait).await,
        Command::Config { save } => show_config(&config, args.config, save),
    }
}

fn backend(config: &TremorLinkConfig) -> Result<BackendClient> {
    Ok(BackendClient::with_timeout(
        config.api.base_url.clone(),
        config.api.timeout(),
    )?)
}

async fn list_files(config: &TremorLinkConfig, processed: bool) -> Result<()> {
    let backend = backend(config)?;
    let files = if processed {
        backend.list_processed_files().await?
    } else {
        backend.list_files().await?
    };
    if files.is_empty() {
        println!("No files");
    }
    for file in files {
        println!("{}", file);
    }
    Ok(())
}

async fn stream(config: &TremorLinkConfig, cmd: StreamCommand) -> Result<()> {
    let parameters = config.recording.parameters;

    let bundle = if cmd.demo {
        let profile = TremorProfile::default();
        let mut simulator = match cmd.seed {
            Some(seed) => TremorSimulator::seeded(profile, seed),
            None => TremorSimulator::new(profile),
        };
        simulator.generate(cmd.demo_length, &parameters)?
    } else {
        let file = cmd
            .file
            .as_deref()
            .ok_or_else(|| anyhow!("--file or --demo is required"))?;
        backend(config)?.process_signal(file, &parameters).await?
    };
    info!(
        "Loaded {} samples at {:?} Hz",
        bundle.len(),
        bundle.sampling_rate()
    );

    let source = load_source(bundle, cmd.normalized.as_deref())?;
    let request = StartRequest {
        channel: cmd
            .channel
            .clone()
            .unwrap_or_else(|| config.streaming.channel.clone()),
        window: match (cmd.start, cmd.end) {
            (Some(start), Some(end)) => Some(ReplayWindow::new(start, end)),
            _ => None,
        },
        looping: cmd.looping || config.streaming.looping,
        record: cmd.record,
        case_id: None,
    };

    let engine_config = EngineConfig {
        record_mode: cmd.record_mode(config.recording.mode),
        ..config.engine_config()
    };
    let duration = seconds(cmd.duration, "--duration")?;

    let recorded = if cmd.offline {
        let session = StreamingSession::offline(engine_config);
        session.set_source(source).await?;
        run_session(&session, request, duration).await?;
        session.recorded().await
    } else {
        let manager = connect(config).await?;
        let session = StreamingSession::with_connection(manager.handle(), engine_config);
        session.set_source(source).await?;
        let result = run_session(&session, request, duration).await;
        let recorded = session.recorded().await;
        session.shutdown().await;
        manager.dispose().await;
        result?;
        recorded
    };

    if cmd.record {
        export(config, &cmd, &recorded, engine_config).await?;
    }
    Ok(())
}

fn load_source(bundle: SignalBundle, normalized: Option<&std::path::Path>) -> Result<StreamSource> {
    let source = StreamSource::new(Arc::new(bundle));
    let Some(path) = normalized else {
        return Ok(source);
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let channels: NormalizedChannels = serde_json::from_str(&content)?;
    Ok(source.with_normalized(channels)?)
}

async fn export(
    config: &TremorLinkConfig,
    cmd: &StreamCommand,
    recorded: &[RecordedSample],
    engine_config: EngineConfig,
) -> Result<()> {
    if recorded.is_empty() {
        warn!("Nothing was recorded");
        return Ok(());
    }

    let meta = ExportMetadata {
        source_file: cmd.file.clone().or_else(|| Some("demo".to_string())),
        parameters: config.recording.parameters,
        normalization: config.recording.normalization,
        mode: engine_config.record_mode,
    };
    let filename = export_filename(&meta, Utc::now());

    if let Some(path) = &cmd.csv {
        let path = if path.is_dir() { path.join(&filename) } else { path.clone() };
        tremorlink_core::datalog::write_csv(&path, recorded)?;
        println!("Wrote {} samples to {}", recorded.len(), path.display());
    } else if let Some(dir) = &config.recording.export_dir {
        let path = dir.join(&filename);
        tremorlink_core::datalog::write_csv(&path, recorded)?;
        println!("Wrote {} samples to {}", recorded.len(), path.display());
    }

    if cmd.save {
        let saved = backend(config)?
            .save_recorded_data(recorded, &filename, &config.recording.parameters)
            .await?;
        println!("Saved to {}", saved.file_path);
    }
    Ok(())
}

async fn play_case(config: &TremorLinkConfig, cmd: CaseCommand) -> Result<()> {
    let case = CaseStudy::from_id(&cmd.case).ok_or_else(|| anyhow!("Unknown case: {}", cmd.case))?;
    let backend = backend(config)?;
    let assignments = backend.case_studies_config().await?;
    let file = assignments
        .file_for(case)
        .ok_or_else(|| anyhow!("No file assigned to {}", case.display_name()))?;

    let series = backend.file_data(file, &cmd.feature).await?;
    let source = StreamSource::new(Arc::new(series.into_bundle()?));
    info!("Playing {} from {}", case.display_name(), file);

    let engine_config = EngineConfig {
        plot_capacity: CASE_STUDY_PLOT_CAPACITY,
        ..config.engine_config()
    };
    let request = case_study_request(case, &cmd.feature);
    let duration = seconds(cmd.duration, "--duration")?;

    if cmd.offline {
        let session = StreamingSession::offline(engine_config);
        session.set_source(source).await?;
        run_session(&session, request, duration).await
    } else {
        let manager = connect(config).await?;
        let session = StreamingSession::with_connection(manager.handle(), engine_config);
        session.set_source(source).await?;
        let result = run_session(&session, request, duration).await;
        session.shutdown().await;
        manager.dispose().await;
        result
    }
}

async fn cases(config: &TremorLinkConfig, assign: Option<String>, file: Option<String>) -> Result<()> {
    let backend = backend(config)?;
    let mut assignments = backend.case_studies_config().await?;

    if let (Some(case), Some(file)) = (assign, file) {
        let case = CaseStudy::from_id(&case).ok_or_else(|| anyhow!("Unknown case: {}", case))?;
        assignments.assign(case, file);
        backend.save_case_studies_config(&assignments).await?;
    }

    for case in CaseStudy::ALL {
        println!(
            "{:<12} {}",
            case.id(),
            assignments.file_for(case).unwrap_or("-")
        );
    }
    Ok(())
}

async fn manual(config: &TremorLinkConfig, value: u8, hold: Option<f64>) -> Result<()> {
    let hold = seconds(hold, "--hold")?;
    let manager = connect(config).await?;
    let mut control = ManualControl::new(manager.handle());
    control.set(value)?;
    control.start()?;

    wait_or_interrupt(hold).await;

    if let Err(e) = control.stop() {
        warn!("Failed to release manual control: {}", e);
    }
    manager.dispose().await;
    Ok(())
}

async fn status(config: &TremorLinkConfig, wait: Option<f64>) -> Result<()> {
    let wait = seconds(wait, "--wait")?;
    let manager = ConnectionManager::create(
        config.device.connection_config(),
        Arc::new(WebSocketConnector),
    );
    let mut status = manager.handle().watch_status();
    manager.connect();

    let report = async {
        loop {
            let current = status.borrow_and_update().clone();
            println!(
                "{:?}: {}{}",
                current.state,
                current.message,
                current
                    .endpoint
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default()
            );
            if status.changed().await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = report => {}
        _ = wait_or_interrupt(wait) => {}
    }
    manager.dispose().await;
    Ok(())
}

fn show_config(
    config: &TremorLinkConfig,
    path: Option<std::path::PathBuf>,
    save: bool,
) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if save {
        let path = path
            .or_else(TremorLinkConfig::default_path)
            .ok_or_else(|| anyhow!("No settings path available"))?;
        config.save(&path)?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}

/// Start the connection manager and wait for the device to come up
async fn connect(config: &TremorLinkConfig) -> Result<ConnectionManager> {
    let manager = ConnectionManager::create(
        config.device.connection_config(),
        Arc::new(WebSocketConnector),
    );
    spawn_device_log(manager.handle());
    manager.connect();

    let mut status = manager.handle().watch_status();
    let opened = timeout(CONNECT_WAIT, async {
        loop {
            if status.borrow_and_update().is_open() {
                return true;
            }
            if status.changed().await.is_err() {
                return false;
            }
        }
    })
    .await;

    match opened {
        Ok(true) => Ok(manager),
        _ => {
            let last = manager.status().message;
            manager.dispose().await;
            bail!("Device not reachable: {}", last)
        }
    }
}

fn spawn_device_log(handle: ConnectionHandle) {
    let mut messages = handle.subscribe_messages();
    tokio::spawn(async move {
        loop {
            match messages.recv().await {
                Ok(DeviceMessage::Status { message }) => println!("device: {}", message),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Run a session until it stops on its own, the duration elapses or Ctrl-C
async fn run_session<D: DeviceSink + 'static>(
    session: &StreamingSession<D>,
    request: StartRequest,
    duration: Option<Duration>,
) -> Result<()> {
    let mut events = session.subscribe();
    let cadence = session.start(request).await?;
    info!(
        "Streaming {} points every {:?}",
        cadence.points_per_batch, cadence.interval
    );

    let stop_after = wait_or_interrupt(duration);
    tokio::pin!(stop_after);
    let mut report = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = &mut stop_after => {
                session.stop().await;
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Stopped { reason }) => {
                    info!("Session ended: {}", reason);
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = report.tick() => {
                let stats = session.stats().await;
                info!(
                    "{} msgs ({} msg/s), t={:.2}s, recorded {}",
                    stats.messages_sent,
                    stats.messages_per_second,
                    stats.session_offset,
                    stats.recorded_samples
                );
            }
        }
    }

    let stats = session.stats().await;
    println!(
        "Sent {} messages in {:.1}s",
        stats.messages_sent,
        stats.total_elapsed.as_secs_f64()
    );
    Ok(())
}

/// A seconds flag as a duration; negative, NaN and overflowing values are rejected
fn seconds(value: Option<f64>, flag: &str) -> Result<Option<Duration>> {
    value
        .map(|secs| {
            Duration::try_from_secs_f64(secs).with_context(|| {
                format!("{} must be a non-negative number of seconds, got {}", flag, secs)
            })
        })
        .transpose()
}

/// Completes after `duration`, or on Ctrl-C
async fn wait_or_interrupt(duration: Option<Duration>) {
    let deadline = async {
        match duration {
            Some(d) => sleep(d).await,
            None => pending::<()>().await,
        }
    };
    tokio::select! {
        _ = deadline => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
                pending::<()>().await;
            }
            info!("Interrupted");
        }
    }
}
