//! Server-role stream task
//!
//! Reads buffers from the capture line, applies gain, sends each buffer as
//! one raw-PCM datagram to the multicast group or to the single handshaken
//! unicast client, and fans the same bytes out to the web relay. Consumers treat every datagram as one self-contained chunk; there
//! is no framing beyond the datagram itself.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::audio::{apply_gain, AudioGateway, CaptureLine};
use crate::config::EngineConfig;
use crate::error::{AudioError, Error, NetworkError, Result};
use crate::net;
use crate::protocol::{TransportMode, CLIENT_HELLO, SERVER_ACK};
use crate::relay::WebRelay;
use crate::session::ServerParams;
use crate::status::{self, keys, StatusSink};

pub(crate) struct ServerStreamCtx {
    pub config: EngineConfig,
    pub gateway: Arc<dyn AudioGateway>,
    pub params: ServerParams,
    pub relay: Option<Arc<WebRelay>>,
    /// Cancelling this stops the presence announcer; a bound unicast peer
    /// means nobody else can join.
    pub announce_token: CancellationToken,
    /// Set by a source switch so the cleanup below leaves the relay alive
    /// for the relaunched session.
    pub keep_relay: Arc<AtomicBool>,
    pub status: StatusSink,
    pub token: CancellationToken,
}

pub(crate) async fn run_stream(ctx: ServerStreamCtx) {
    let result = stream_inner(&ctx).await;
    if let Err(e) = result {
        if !ctx.token.is_cancelled() {
            status::emit(&ctx.status, keys::ERROR_SERVER, vec![e.to_string().into()]);
        }
    }

    // Cleanup runs on every exit path: success, failure or cancellation.
    ctx.announce_token.cancel();
    status::emit(&ctx.status, keys::SERVER_STOPPED, vec![]);
    if let Some(relay) = &ctx.relay {
        if !ctx.keep_relay.load(Ordering::SeqCst) {
            relay.stop().await;
        }
    }
}

async fn stream_inner(ctx: &ServerStreamCtx) -> Result<()> {
    let params = &ctx.params;

    let mut line = match ctx.gateway.open_capture(&params.capture_device, &params.format) {
        Ok(line) => line,
        Err(AudioError::DeviceNotFound(_)) => {
            status::emit(&ctx.status, keys::ERROR_NO_DEVICE, vec![]);
            return Ok(());
        }
        Err(AudioError::UnsupportedFormat(_)) => {
            status::emit(&ctx.status, keys::ERROR_UNSUPPORTED_FORMAT, vec![]);
            return Ok(());
        }
        Err(AudioError::InvalidBufferSize(..)) => {
            status::emit(&ctx.status, keys::ERROR_INVALID_BUFFER, vec![]);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let Some(chunk_size) = params.format.adjusted_buffer_size() else {
        status::emit(&ctx.status, keys::ERROR_INVALID_BUFFER, vec![]);
        return Ok(());
    };

    match params.mode {
        TransportMode::Multicast => {
            let socket = net::bind_udp(0).await?;
            let target: SocketAddr = (ctx.config.multicast_group, params.port).into();
            status::emit(&ctx.status, keys::MULTICAST_STREAMING, vec![params.port.into()]);
            pump(ctx, &mut line, &socket, target, chunk_size).await
        }
        TransportMode::Unicast => {
            let socket = net::bind_udp(params.port).await?;
            status::emit(&ctx.status, keys::SERVER_WAITING, vec![params.port.into()]);

            let client = tokio::select! {
                _ = ctx.token.cancelled() => return Ok(()),
                client = wait_for_hello(&socket) => client?,
            };
            status::emit(&ctx.status, keys::CLIENT_CONNECTED, vec![client.into()]);
            ctx.announce_token.cancel();
            socket
                .send_to(SERVER_ACK.as_bytes(), client)
                .await
                .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

            pump(ctx, &mut line, &socket, client, chunk_size).await
        }
    }
}

/// Receive datagrams until the client hello arrives; everything else on
/// the port beforehand is ignored.
async fn wait_for_hello(socket: &UdpSocket) -> Result<SocketAddr> {
    let mut buf = [0u8; 256];
    loop {
        let (len, src) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
        if let Ok(text) = std::str::from_utf8(&buf[..len]) {
            if text.trim() == CLIENT_HELLO {
                return Ok(src);
            }
        }
        tracing::debug!(%src, "ignoring pre-handshake datagram");
    }
}

/// Per-buffer loop: accumulate capture chunks to exactly one adjusted
/// buffer, apply gain, send, fan out. Ends without error on cancellation
/// or capture end-of-stream.
async fn pump(
    ctx: &ServerStreamCtx,
    line: &mut CaptureLine,
    socket: &UdpSocket,
    target: SocketAddr,
    chunk_size: usize,
) -> Result<()> {
    let gain = ctx.params.gain;
    let mut pending: Vec<u8> = Vec::with_capacity(chunk_size * 2);

    loop {
        tokio::select! {
            _ = ctx.token.cancelled() => return Ok(()),
            read = line.read() => {
                let Some(captured) = read else {
                    return Ok(()); // end of stream
                };
                pending.extend_from_slice(&captured);
                while pending.len() >= chunk_size {
                    let mut buffer: Vec<u8> = pending.drain(..chunk_size).collect();
                    if gain != 1.0 {
                        apply_gain(&mut buffer, gain);
                    }
                    let buffer = Bytes::from(buffer);
                    socket
                        .send_to(&buffer, target)
                        .await
                        .map_err(|e| Error::from(NetworkError::SendFailed(e.to_string())))?;
                    if let Some(relay) = &ctx.relay {
                        relay.broadcast_audio(buffer);
                    }
                }
            }
        }
    }
}
