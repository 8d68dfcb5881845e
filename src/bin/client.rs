//! Client Application
//!
//! Discovers a streaming server on the LAN, connects and renders the
//! stream to a local output device.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wifi_audio_streamer::{
    discovery::DiscoveryCallback,
    status::StatusSink,
    AudioFormat, ClientParams, CpalGateway, Engine, EngineConfig, ServerInfo,
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

    tracing::info!("Starting WiFi Audio Streamer client");

    let config = EngineConfig::default();
    let engine = Engine::new(config.clone(), Arc::new(CpalGateway));

    println!("\n=== Available Output Devices ===");
    let devices = engine.render_devices();
    for device in &devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  [{}] {}{}", device.index, device.name, default_marker);
    }
    let render_device = match std::env::args().nth(1) {
        Some(name) => name,
        None => devices
            .iter()
            .find(|d| d.is_default)
            .or_else(|| devices.first())
            .map(|d| d.name.clone())
            .ok_or_else(|| anyhow::anyhow!("no output devices available"))?,
    };

    // Collect beacons for one listen window, then pick the first server.
    println!("\nSearching for servers...");
    let found: Arc<Mutex<HashMap<String, ServerInfo>>> = Arc::new(Mutex::new(HashMap::new()));
    let sink = found.clone();
    let callback: DiscoveryCallback = Arc::new(move |hostname, info| {
        tracing::info!(%hostname, ip = %info.ip, "discovered server");
        sink.lock().insert(hostname, info);
    });
    engine.begin_device_discovery(callback).await;
    tokio::time::sleep(config.listen_timeout()).await;
    engine.end_device_discovery().await;

    let server = {
        let found = found.lock();
        let Some((hostname, info)) = found.iter().next() else {
            anyhow::bail!("no servers found on the network");
        };
        println!("Connecting to {hostname} at {}", info.ip);
        *info
    };

    let status: StatusSink = Arc::new(|event| {
        tracing::info!(key = event.key, args = ?event.args, "status");
    });
    engine
        .launch_client(
            ClientParams {
                format: AudioFormat::default(),
                server,
                render_device,
                mic_capture_device: None,
            },
            status,
        )
        .await;

    println!("Listening. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    engine.stop().await;
    Ok(())
}
