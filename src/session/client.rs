//! Client-role stream task
//!
//! Unicast: hello/ack handshake, then receive datagrams and hand each one
//! to the render line. Multicast: join the group and do the same without a
//! handshake. A handshake timeout is a distinct, expected failure; every
//! other non-cancellation error surfaces as a generic client error.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioGateway, RenderLine};
use crate::config::EngineConfig;
use crate::error::{NetworkError, Result};
use crate::net;
use crate::protocol::{CLIENT_HELLO, SERVER_ACK};
use crate::session::ClientParams;
use crate::status::{self, keys, StatusSink};

pub(crate) struct ClientStreamCtx {
    pub config: EngineConfig,
    pub gateway: Arc<dyn AudioGateway>,
    pub params: ClientParams,
    pub status: StatusSink,
    pub token: CancellationToken,
}

pub(crate) async fn run_stream(ctx: ClientStreamCtx) {
    let result = stream_inner(&ctx).await;
    if let Err(e) = result {
        if !ctx.token.is_cancelled() {
            status::emit(&ctx.status, keys::ERROR_CLIENT, vec![e.to_string().into()]);
        }
    }
    // Render line is dropped inside the inner task; only the lifecycle
    // event remains.
    status::emit(&ctx.status, keys::STREAMING_ENDED, vec![]);
}

async fn stream_inner(ctx: &ClientStreamCtx) -> Result<()> {
    let params = &ctx.params;

    if !params.server.is_multicast {
        let remote = SocketAddr::new(params.server.ip, params.server.port);
        let socket = net::bind_udp(0).await?;

        status::emit(&ctx.status, keys::CONTACTING_SERVER, vec![remote.into()]);
        socket
            .send_to(CLIENT_HELLO.as_bytes(), remote)
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        status::emit(&ctx.status, keys::WAITING_ACK, vec![]);
        let mut buf = [0u8; 256];
        match timeout(ctx.config.handshake_timeout(), socket.recv_from(&mut buf)).await {
            Err(_elapsed) => {
                status::emit(&ctx.status, keys::SERVER_NO_RESPONSE, vec![]);
                return Ok(());
            }
            Ok(Err(e)) => return Err(NetworkError::ReceiveFailed(e.to_string()).into()),
            Ok(Ok((len, _))) => {
                let ack = std::str::from_utf8(&buf[..len]).unwrap_or_default().trim();
                if ack != SERVER_ACK {
                    status::emit(&ctx.status, keys::HANDSHAKE_FAILED, vec![]);
                    return Ok(());
                }
            }
        }

        status::emit(&ctx.status, keys::CONNECTED_STREAMING_FROM, vec![remote.into()]);
        let render = ctx.gateway.open_render(&params.render_device, &params.format)?;
        receive_into(ctx, &socket, &render).await
    } else {
        status::emit(&ctx.status, keys::JOINING_MULTICAST, vec![params.server.port.into()]);
        let socket = net::bind_multicast(params.server.port, ctx.config.multicast_group)?;
        let render = ctx.gateway.open_render(&params.render_device, &params.format)?;

        status::emit(&ctx.status, keys::MULTICAST_STREAMING, vec![params.server.port.into()]);
        receive_into(ctx, &socket, &render).await
    }
}

/// Receive loop: one datagram in, one render write out, until cancelled.
async fn receive_into(ctx: &ClientStreamCtx, socket: &UdpSocket, render: &RenderLine) -> Result<()> {
    let mut buf = vec![0u8; ctx.params.format.buffer_size.max(1024) * 2];
    loop {
        tokio::select! {
            _ = ctx.token.cancelled() => return Ok(()),
            received = socket.recv_from(&mut buf) => {
                let (len, _) = received.map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
                if len > 0 {
                    if render.write(Bytes::copy_from_slice(&buf[..len])).await.is_err() {
                        return Ok(()); // render device went away
                    }
                }
            }
        }
    }
}
