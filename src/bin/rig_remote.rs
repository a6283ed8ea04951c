//! Headless remote operation client
//!
//! Connects to the transceiver, starts audio once the control session is
//! up and bridges it to the local sound card until Ctrl+C.
//!
//! Usage: `rig-remote [CONFIG_PATH]` or `rig-remote --list-devices`.
//! The login password is read from `RIG_PASSWORD`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rig_remote::{
    audio::device::{list_devices, DeviceStream},
    config::AppConfig,
    network::control::{ControlEvent, ControlState},
    session::RigSession,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--list-devices") {
        print_devices();
        return Ok(());
    }

    let path = match arg {
        Some(path) => PathBuf::from(path),
        None => AppConfig::default_path().context("no configuration directory on this platform")?,
    };
    let config = AppConfig::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    tracing::info!("Starting rig remote for {}:{}", config.control.host, config.control.port);

    let password = std::env::var("RIG_PASSWORD").ok();
    let (mut session, mut events) = RigSession::new(config.clone());
    session.connect(password.as_deref()).await?;

    let mut devices: Vec<DeviceStream> = Vec::new();
    let mut stats_timer = tokio::time::interval(STATS_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ControlEvent::Status(ControlState::Connected) => {
                        match session.start_audio().await {
                            Ok(peer) => {
                                tracing::info!("Audio streaming with {}", peer);
                                devices = start_devices(&config, &session);
                            }
                            Err(e) => {
                                tracing::error!("Media start failed: {}", e);
                                break;
                            }
                        }
                    }
                    ControlEvent::Status(ControlState::Disconnected) => {
                        tracing::info!("Control session ended");
                        break;
                    }
                    ControlEvent::Status(state) => tracing::info!("Status: {:?}", state),
                    ControlEvent::Error(e) => tracing::error!("{}", e),
                    ControlEvent::Frame(frame) => tracing::info!("Rig: {}", frame),
                    ControlEvent::Log(line) => tracing::debug!("{}", line),
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = stats_timer.tick() => {
                if session.is_audio_running() {
                    let stats = session.media_stats();
                    tracing::info!(
                        "rx {} pkts ({} concealed, {} late) | tx {} pkts ({} silent, {} dropped) | playout {:.0}% capture {:.0}%",
                        stats.receiver.packets_received,
                        stats.receiver.concealed_frames,
                        stats.receiver.late_packets,
                        stats.sender.packets_sent,
                        stats.sender.silent_packets,
                        stats.sender.dropped_frames,
                        stats.playout_level * 100.0,
                        stats.capture_level * 100.0,
                    );
                }
                for device in &devices {
                    if let Some(e) = device.check_errors() {
                        tracing::warn!("{}: {}", device.device_name(), e);
                    }
                }
            }
        }
    }

    // Sound card first so nothing touches the rings during teardown
    for mut device in devices.drain(..) {
        device.stop();
    }
    session.shutdown().await;

    tracing::info!("Stopped");
    Ok(())
}

/// Open playout and capture; audio keeps flowing without either
fn start_devices(config: &AppConfig, session: &RigSession) -> Vec<DeviceStream> {
    let mut streams = Vec::new();

    match DeviceStream::start_playout(
        config.audio.playout_device.as_deref(),
        session.playout_buffer(),
    ) {
        Ok(stream) => streams.push(stream),
        Err(e) => tracing::warn!("No playout device: {}", e),
    }

    match DeviceStream::start_capture(
        config.audio.capture_device.as_deref(),
        session.capture_buffer(),
    ) {
        Ok(stream) => streams.push(stream),
        Err(e) => tracing::warn!("No capture device: {}", e),
    }

    streams
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        let kind = match (device.is_input, device.is_output) {
            (true, true) => "in/out",
            (true, false) => "in",
            _ => "out",
        };
        println!("  {} ({}){}", device.name, kind, default_marker);
    }
    println!();
}
