//! Server Application
//!
//! Captures audio from a local device and streams it to the LAN, with
//! discovery beacons and the browser relay running alongside.

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wifi_audio_streamer::{
    audio::capture_policy,
    status::StatusSink,
    AudioFormat, CpalGateway, Engine, EngineConfig, ServerParams, TransportMode,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting WiFi Audio Streamer server");

    let mut args = std::env::args().skip(1);
    let mode = match args.next().as_deref() {
        Some("unicast") => TransportMode::Unicast,
        Some("multicast") | None => TransportMode::Multicast,
        Some(other) => anyhow::bail!("unknown mode '{other}', expected multicast or unicast"),
    };
    let device_arg = args.next();

    let config = EngineConfig::default();
    let engine = Engine::new(config.clone(), Arc::new(CpalGateway));

    println!("\n=== Available Capture Devices ===");
    let devices = engine.capture_devices();
    for device in &devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  [{}] {}{}", device.index, device.name, default_marker);
    }
    if devices.is_empty() {
        anyhow::bail!("no capture devices available");
    }

    let capture_device = match device_arg {
        Some(name) => name,
        None => devices
            .iter()
            .find(|d| d.is_default)
            .unwrap_or(&devices[0])
            .name
            .clone(),
    };

    let (format, gain) = capture_policy(&config, &capture_device, AudioFormat::default());
    tracing::info!(device = %capture_device, %mode, gain, "launching server session");

    let status: StatusSink = Arc::new(|event| {
        tracing::info!(key = event.key, args = ?event.args, "status");
    });
    engine
        .launch_server(
            ServerParams {
                format,
                port: config.stream_port,
                mode,
                capture_device,
                mic_render_device: None,
                gain,
            },
            status,
        )
        .await;

    println!("\nStreaming. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    engine.stop().await;
    Ok(())
}
