//! Low-latency LAN audio streaming.
//!
//! One host captures PCM audio and sends it over UDP, multicast fan-out
//! or a single handshaken unicast peer, while announcing itself on a
//! well-known multicast discovery group. Clients discover servers from
//! those beacons and render the stream; a reverse mic sub-channel carries
//! client microphone audio back to the server. An embedded web relay fans
//! the same audio out to browsers over WebSocket and exposes a small HTTP
//! surface for listing capture devices and hot-swapping the source.
//!
//! The [`session::Engine`] ties it all together; hosts observe progress
//! and failures through the [`status`] event contract rather than log
//! output.

pub mod audio;
pub mod config;
pub mod discovery;
pub mod error;
pub mod net;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod status;

pub use audio::{AudioFormat, AudioGateway, CpalGateway, DeviceInfo};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use protocol::{ServerInfo, TransportMode};
pub use session::{ClientParams, Engine, ServerParams};
pub use status::{StatusEvent, StatusSink};
