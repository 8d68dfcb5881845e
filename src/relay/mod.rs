//! Browser fan-out relay
//!
//! Bridges the UDP stream to browser viewers: every captured PCM chunk is
//! pushed as one binary websocket frame to every connected viewer. Also
//! exposes the two administrative operations the remote page consumes:
//! capture-device enumeration and source switching by index.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::audio::{AudioGateway, DeviceInfo};
use crate::error::{NetworkError, Result};

/// Frames buffered per viewer before broadcast starts dropping for it.
const VIEWER_QUEUE_DEPTH: usize = 64;

/// Callback invoked when the remote page requests a capture-source switch.
pub type SourceSwitchFn = Arc<dyn Fn(usize) + Send + Sync>;

/// Websocket fan-out relay plus its admin surface.
pub struct WebRelay {
    port: u16,
    gateway: Arc<dyn AudioGateway>,
    viewers: DashMap<Uuid, mpsc::Sender<Bytes>>,
    on_source_switch: RwLock<Option<SourceSwitchFn>>,
    shutdown: CancellationToken,
    server: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WebRelay {
    pub fn new(port: u16, gateway: Arc<dyn AudioGateway>) -> Arc<Self> {
        Arc::new(Self {
            port,
            gateway,
            viewers: DashMap::new(),
            on_source_switch: RwLock::new(None),
            shutdown: CancellationToken::new(),
            server: Mutex::new(None),
        })
    }

    /// Register the source-switch callback consumed by `POST
    /// /system/change-source`.
    pub fn set_source_switch(&self, callback: SourceSwitchFn) {
        *self.on_source_switch.write() = Some(callback);
    }

    /// Bind and serve. Returns the bound address (useful with port 0).
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let app = Router::new()
            .route("/stream", get(stream_handler))
            .route("/system/devices", get(devices_handler))
            .route("/system/change-source", post(change_source_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.port))
            .await
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let addr = listener.local_addr().map_err(crate::error::Error::Io)?;

        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!("web relay server error: {}", e);
            }
        });
        *self.server.lock().await = Some(handle);

        tracing::info!(%addr, "web relay started");
        Ok(addr)
    }

    /// Push one PCM chunk to every connected viewer. No-op with no
    /// viewers. A full or broken viewer queue is skipped, never awaited:
    /// one stalled browser must not hold back the rest, and removal is the
    /// connection task's job.
    pub fn broadcast_audio(&self, chunk: Bytes) {
        if self.viewers.is_empty() {
            return;
        }
        for viewer in self.viewers.iter() {
            let _ = viewer.value().try_send(chunk.clone());
        }
    }

    /// False once [`WebRelay::stop`] has run; a stopped relay cannot be
    /// restarted and must be replaced.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Number of connected viewers.
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Eligible capture devices, as shown to the admin page.
    pub fn capture_devices(&self) -> Vec<DeviceInfo> {
        self.gateway.capture_devices()
    }

    /// Invoke the registered source-switch callback. False when none is
    /// registered.
    pub fn request_source_switch(&self, index: usize) -> bool {
        match self.on_source_switch.read().as_ref() {
            Some(cb) => {
                tracing::info!(index, "source switch requested");
                cb(index);
                true
            }
            None => false,
        }
    }

    /// Stop serving and drop all viewers. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.server.lock().await.take() {
            let _ = handle.await;
        }
        self.viewers.clear();
        tracing::debug!("web relay stopped");
    }
}

async fn stream_handler(State(relay): State<Arc<WebRelay>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| viewer_session(relay, socket))
}

/// One task per viewer connection: forward queued chunks out, watch the
/// incoming side for close, remove self from the set on the way out.
async fn viewer_session(relay: Arc<WebRelay>, socket: WebSocket) {
    let id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Bytes>(VIEWER_QUEUE_DEPTH);
    relay.viewers.insert(id, tx);
    tracing::info!(%id, viewers = relay.viewer_count(), "viewer connected");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            chunk = rx.recv() => {
                match chunk {
                    Some(chunk) => {
                        if sink.send(Message::Binary(chunk.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    None => break, // relay dropped the viewer set
                }
            }
            incoming = stream.next() => {
                match incoming {
                    // Viewers only keep the connection alive; their frames
                    // carry nothing.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    relay.viewers.remove(&id);
    tracing::info!(%id, viewers = relay.viewer_count(), "viewer disconnected");
}

async fn devices_handler(State(relay): State<Arc<WebRelay>>) -> Json<Vec<DeviceInfo>> {
    Json(relay.capture_devices())
}

async fn change_source_handler(
    State(relay): State<Arc<WebRelay>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let index = params.get("index").and_then(|raw| raw.parse::<usize>().ok());
    match index {
        Some(index) if relay.request_source_switch(index) => {
            (StatusCode::OK, "SUCCESS").into_response()
        }
        Some(_) => (StatusCode::SERVICE_UNAVAILABLE, "NO ACTIVE SESSION").into_response(),
        None => (StatusCode::BAD_REQUEST, "INVALID INDEX").into_response(),
    }
}
