//! Reverse microphone sub-channel
//!
//! Runs opposite to the primary stream: the receiving side captures its
//! microphone and sends it back to the server, which renders it locally
//! (typically into a virtual cable). Both tasks are owned by the active
//! session and cancelled as part of its stop sequence.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioFormat, AudioGateway};
use crate::config::EngineConfig;
use crate::net;
use crate::protocol::ServerInfo;

/// Server side: receive the peer's microphone and render it locally.
///
/// A render device that does not support the format is skipped without a
/// status event. That mirrors long-standing behavior the host applications
/// rely on; see DESIGN.md for the candidate fix.
pub(crate) async fn run_mic_receiver(
    config: EngineConfig,
    gateway: Arc<dyn AudioGateway>,
    format: AudioFormat,
    is_multicast: bool,
    render_device: String,
    mic_port: u16,
    token: CancellationToken,
) {
    if !gateway.supports_render(&render_device, &format) {
        tracing::debug!(device = %render_device, "mic render device does not support format, skipping");
        return;
    }
    let render = match gateway.open_render(&render_device, &format) {
        Ok(line) => line,
        Err(e) => {
            tracing::debug!("mic render line failed to open: {}", e);
            return;
        }
    };

    let socket = if is_multicast {
        net::bind_multicast(mic_port, config.multicast_group)
    } else {
        net::bind_udp(mic_port).await
    };
    let socket = match socket {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("mic receiver socket failed: {}", e);
            return;
        }
    };

    tracing::info!(mic_port, "mic receiver running");
    let mut buf = vec![0u8; format.buffer_size.max(1024) * 2];
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, _)) if len > 0 => {
                        if render.write(Bytes::copy_from_slice(&buf[..len])).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("mic receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("mic receiver stopped");
}

/// Client side: capture the local microphone and send it to the server.
pub(crate) async fn run_mic_sender(
    config: EngineConfig,
    gateway: Arc<dyn AudioGateway>,
    format: AudioFormat,
    server: ServerInfo,
    capture_device: String,
    mic_port: u16,
    token: CancellationToken,
) {
    let mut capture = match gateway.open_capture(&capture_device, &format) {
        Ok(line) => line,
        Err(e) => {
            tracing::debug!("mic capture line failed to open: {}", e);
            return;
        }
    };
    let socket = match net::bind_udp(0).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("mic sender socket failed: {}", e);
            return;
        }
    };

    let target: SocketAddr = if server.is_multicast {
        (config.multicast_group, mic_port).into()
    } else {
        (server.ip, mic_port).into()
    };

    tracing::info!(%target, "mic sender running");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            chunk = capture.read() => {
                match chunk {
                    None => break, // capture device went away
                    Some(chunk) if !chunk.is_empty() => {
                        if let Err(e) = socket.send_to(&chunk, target).await {
                            tracing::debug!("mic send error: {}", e);
                            break;
                        }
                    }
                    Some(_) => {}
                }
            }
        }
    }
    tracing::debug!("mic sender stopped");
}
