//! Session lifecycle
//!
//! The [`Engine`] owns every long-running task (announcer, discovery
//! listener, stream, mic sub-channel, web relay) and sequences their
//! startup and teardown. All mutation goes through one async mutex; tasks
//! are taken out of the state under the lock and joined after it is
//! released, so no task can deadlock against its own teardown.

mod client;
mod mic;
mod server;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::{capture_policy, AudioFormat, AudioGateway, DeviceInfo};
use crate::config::EngineConfig;
use crate::discovery::{self, DiscoveryCallback};
use crate::protocol::{ServerInfo, TransportMode};
use crate::relay::WebRelay;
use crate::status::StatusSink;

/// Everything a server session needs up front. `gain` and the channel
/// count are normally derived via [`capture_policy`], but callers may
/// override them.
#[derive(Debug, Clone)]
pub struct ServerParams {
    pub format: AudioFormat,
    pub port: u16,
    pub mode: TransportMode,
    pub capture_device: String,
    /// Render device for incoming mic audio; `None` disables the
    /// sub-channel receiver.
    pub mic_render_device: Option<String>,
    pub gain: f32,
}

/// Everything a client session needs up front.
#[derive(Debug, Clone)]
pub struct ClientParams {
    pub format: AudioFormat,
    pub server: ServerInfo,
    pub render_device: String,
    /// Capture device for outgoing mic audio; `None` disables the
    /// sub-channel sender.
    pub mic_capture_device: Option<String>,
}

/// A spawned task paired with its cancellation token.
struct Task {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Task {
    async fn cancel_and_join(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }

    /// Cancel without waiting, joining on a detached task. Used where the
    /// caller holds the state lock and must not block on the join.
    fn cancel_detached(self) {
        self.token.cancel();
        tokio::spawn(async move {
            let _ = self.handle.await;
        });
    }
}

/// Stream task plus the flag its cleanup consults before tearing down the
/// relay.
struct StreamTask {
    task: Task,
    keep_relay: Arc<AtomicBool>,
}

#[derive(Default)]
struct EngineState {
    announcer: Option<Task>,
    listener: Option<Task>,
    stream: Option<StreamTask>,
    mic: Option<Task>,
    relay: Option<Arc<WebRelay>>,
    /// Last server launch, kept so a relay-driven source switch can
    /// relaunch with everything but the capture device unchanged.
    current_server: Option<(ServerParams, StatusSink)>,
}

impl EngineState {
    /// Cancel any audio tasks a racing launch installed between the
    /// caller's teardown and its lock acquisition. The relay is left
    /// untouched; the evicted stream's cleanup must not tear it down.
    fn evict_audio_tasks(&mut self) {
        if let Some(old) = self.stream.take() {
            old.keep_relay.store(true, Ordering::SeqCst);
            old.task.cancel_detached();
        }
        if let Some(old) = self.announcer.take() {
            old.cancel_detached();
        }
        if let Some(old) = self.mic.take() {
            old.cancel_detached();
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    gateway: Arc<dyn AudioGateway>,
    state: tokio::sync::Mutex<EngineState>,
}

impl Engine {
    pub fn new(config: EngineConfig, gateway: Arc<dyn AudioGateway>) -> Arc<Self> {
        Arc::new(Self {
            config,
            gateway,
            state: tokio::sync::Mutex::new(EngineState::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capture_devices(&self) -> Vec<DeviceInfo> {
        self.gateway.capture_devices()
    }

    pub fn render_devices(&self) -> Vec<DeviceInfo> {
        self.gateway.render_devices()
    }

    /// Start a server session. A running session is torn down first, then
    /// the settle delay gives the audio device time to release before it
    /// is reopened.
    pub async fn launch_server(self: &Arc<Self>, params: ServerParams, status: StatusSink) {
        if self.stop_audio_only().await {
            tokio::time::sleep(self.config.settle_delay()).await;
        }

        let relay = self.ensure_relay().await;

        // Spawn-and-store happens under one lock acquisition so a second
        // launch cannot interleave and overwrite a live session.
        let mut state = self.state.lock().await;
        state.evict_audio_tasks();

        let announcer = self.spawn_announcer(params.mode, params.port);
        let announce_token = announcer.token.clone();

        state.mic = params.mic_render_device.clone().map(|device| {
            let token = CancellationToken::new();
            let handle = tokio::spawn(mic::run_mic_receiver(
                self.config.clone(),
                self.gateway.clone(),
                params.format.with_channels(1),
                params.mode.is_multicast(),
                device,
                self.config.mic_port,
                token.clone(),
            ));
            Task { token, handle }
        });

        let keep_relay = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        let ctx = server::ServerStreamCtx {
            config: self.config.clone(),
            gateway: self.gateway.clone(),
            params: params.clone(),
            relay,
            announce_token,
            keep_relay: keep_relay.clone(),
            status: status.clone(),
            token: token.clone(),
        };
        let handle = tokio::spawn(server::run_stream(ctx));

        state.announcer = Some(announcer);
        state.stream = Some(StreamTask {
            task: Task { token, handle },
            keep_relay,
        });
        state.current_server = Some((params, status));
    }

    /// Start a client session, replacing any running one.
    pub async fn launch_client(self: &Arc<Self>, params: ClientParams, status: StatusSink) {
        self.stop_audio_only().await;

        let mut state = self.state.lock().await;
        state.evict_audio_tasks();

        state.mic = params.mic_capture_device.clone().map(|device| {
            let token = CancellationToken::new();
            let handle = tokio::spawn(mic::run_mic_sender(
                self.config.clone(),
                self.gateway.clone(),
                params.format.with_channels(1),
                params.server,
                device,
                self.config.mic_port,
                token.clone(),
            ));
            Task { token, handle }
        });

        let token = CancellationToken::new();
        let ctx = client::ClientStreamCtx {
            config: self.config.clone(),
            gateway: self.gateway.clone(),
            params,
            status,
            token: token.clone(),
        };
        let handle = tokio::spawn(client::run_stream(ctx));

        state.stream = Some(StreamTask {
            task: Task { token, handle },
            keep_relay: Arc::new(AtomicBool::new(false)),
        });
        state.current_server = None;
    }

    /// Stop everything: announcer first so no new peers arrive, then the
    /// stream and mic tasks, then the relay. Safe to call repeatedly; a
    /// second call finds nothing to take and returns immediately.
    pub async fn stop(&self) {
        let (announcer, stream, mic, relay) = {
            let mut state = self.state.lock().await;
            state.current_server = None;
            (
                state.announcer.take(),
                state.stream.take(),
                state.mic.take(),
                state.relay.take(),
            )
        };

        if let Some(task) = announcer {
            task.cancel_and_join().await;
        }
        if let Some(stream) = stream {
            stream.task.cancel_and_join().await;
        }
        if let Some(task) = mic {
            task.cancel_and_join().await;
        }
        if let Some(relay) = relay {
            relay.stop().await;
        }
    }

    /// Tear down the audio side (announcer, stream, mic) but leave the
    /// relay serving its viewers. Returns whether a stream was running.
    pub async fn stop_audio_only(&self) -> bool {
        let (announcer, stream, mic) = {
            let mut state = self.state.lock().await;
            (state.announcer.take(), state.stream.take(), state.mic.take())
        };

        let was_streaming = stream.is_some();
        if let Some(task) = announcer {
            task.cancel_and_join().await;
        }
        if let Some(stream) = stream {
            stream.keep_relay.store(true, Ordering::SeqCst);
            stream.task.cancel_and_join().await;
        }
        if let Some(task) = mic {
            task.cancel_and_join().await;
        }
        was_streaming
    }

    /// Hot-swap the capture source of a running server session: stop the
    /// audio side, wait out the settle delay and relaunch on the device at
    /// `index`, with channel count and gain re-derived from its name.
    ///
    /// Returns a boxed future: the relay's source-switch callback spawns
    /// this from inside the relaunch path, and an opaque future there
    /// would make its own `Send` bound self-referential.
    pub fn switch_source(self: &Arc<Self>, index: usize) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let engine = self.clone();
        Box::pin(async move {
            let Some((params, status)) = engine.state.lock().await.current_server.clone() else {
                tracing::warn!(index, "source switch requested with no server session");
                return;
            };
            let Some(device) = engine.gateway.capture_devices().into_iter().nth(index) else {
                tracing::warn!(index, "source switch requested for unknown device index");
                return;
            };

            engine.stop_audio_only().await;
            tokio::time::sleep(engine.config.settle_delay()).await;

            let (format, gain) = capture_policy(&engine.config, &device.name, params.format);
            tracing::info!(device = %device.name, gain, "switching capture source");
            engine
                .launch_server(
                    ServerParams {
                        format,
                        gain,
                        capture_device: device.name,
                        ..params
                    },
                    status,
                )
                .await;
        })
    }

    /// Start listening for peer beacons. A second call while the listener
    /// runs is a no-op.
    pub async fn begin_device_discovery(&self, callback: DiscoveryCallback) {
        let mut state = self.state.lock().await;
        if state.listener.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(discovery::run_listener(
            self.config.clone(),
            callback,
            token.clone(),
        ));
        state.listener = Some(Task { token, handle });
    }

    pub async fn end_device_discovery(&self) {
        let listener = self.state.lock().await.listener.take();
        if let Some(task) = listener {
            task.cancel_and_join().await;
        }
    }

    /// Announce presence without a running stream. [`launch_server`]
    /// manages its own announcer; this is for announcing ahead of one.
    pub async fn start_announcing(&self, mode: TransportMode, port: u16) {
        let mut state = self.state.lock().await;
        if state.announcer.is_some() {
            return;
        }
        let announcer = self.spawn_announcer(mode, port);
        state.announcer = Some(announcer);
    }

    pub async fn stop_announcing(&self) {
        let announcer = self.state.lock().await.announcer.take();
        if let Some(task) = announcer {
            task.cancel_and_join().await;
        }
    }

    fn spawn_announcer(&self, mode: TransportMode, port: u16) -> Task {
        let token = CancellationToken::new();
        let handle = tokio::spawn(discovery::run_announcer(
            self.config.clone(),
            mode,
            port,
            token.clone(),
        ));
        Task { token, handle }
    }

    /// Return the running relay, starting and storing one if needed. The
    /// state lock is held across the whole check-create-store so two
    /// concurrent launches cannot race a second relay into existence. A
    /// relay that fails to start is logged and skipped; audio streaming
    /// does not depend on it.
    async fn ensure_relay(self: &Arc<Self>) -> Option<Arc<WebRelay>> {
        let mut state = self.state.lock().await;
        if let Some(relay) = &state.relay {
            // A stream that died on its own stops the relay; replace it.
            if relay.is_running() {
                return Some(relay.clone());
            }
        }

        let relay = WebRelay::new(self.config.relay_port, self.gateway.clone());
        let engine: Weak<Engine> = Arc::downgrade(self);
        relay.set_source_switch(Arc::new(move |index| {
            if let Some(engine) = engine.upgrade() {
                tokio::spawn(engine.switch_source(index));
            }
        }));

        match relay.start().await {
            Ok(addr) => {
                tracing::info!(%addr, "web relay listening");
                state.relay = Some(relay.clone());
                Some(relay)
            }
            Err(e) => {
                tracing::warn!("web relay failed to start: {}", e);
                None
            }
        }
    }
}
