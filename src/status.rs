//! Lifecycle status events
//!
//! The engine never formats human-readable text. Every lifecycle transition
//! is reported as a `(key, args)` pair so the embedding application can
//! localize it. Keys are stable identifiers; args are ordered opaque values.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Status keys emitted by the engine.
pub mod keys {
    pub const ERROR_NO_DEVICE: &str = "status_error_no_device";
    pub const ERROR_UNSUPPORTED_FORMAT: &str = "status_error_unsupported_format";
    pub const ERROR_INVALID_BUFFER: &str = "status_error_invalid_buffer";
    pub const ERROR_SERVER: &str = "status_error_server";
    pub const ERROR_CLIENT: &str = "status_error_client";
    pub const MULTICAST_STREAMING: &str = "status_multicast_streaming";
    pub const SERVER_WAITING: &str = "status_server_waiting";
    pub const CLIENT_CONNECTED: &str = "status_client_connected";
    pub const SERVER_STOPPED: &str = "status_server_stopped";
    pub const CONTACTING_SERVER: &str = "status_contacting_server";
    pub const WAITING_ACK: &str = "status_waiting_ack";
    pub const HANDSHAKE_FAILED: &str = "status_handshake_failed";
    pub const CONNECTED_STREAMING_FROM: &str = "status_connected_streaming_from";
    pub const JOINING_MULTICAST: &str = "status_joining_multicast";
    pub const SERVER_NO_RESPONSE: &str = "status_server_no_response";
    pub const STREAMING_ENDED: &str = "status_streaming_ended";
}

/// A single positional argument of a status event.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Int(v) => write!(f, "{}", v),
            StatusValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<u16> for StatusValue {
    fn from(v: u16) -> Self {
        StatusValue::Int(v as i64)
    }
}

impl From<i64> for StatusValue {
    fn from(v: i64) -> Self {
        StatusValue::Int(v)
    }
}

impl From<String> for StatusValue {
    fn from(v: String) -> Self {
        StatusValue::Text(v)
    }
}

impl From<&str> for StatusValue {
    fn from(v: &str) -> Self {
        StatusValue::Text(v.to_string())
    }
}

impl From<SocketAddr> for StatusValue {
    fn from(v: SocketAddr) -> Self {
        StatusValue::Text(v.to_string())
    }
}

/// A lifecycle transition report.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub key: &'static str,
    pub args: Vec<StatusValue>,
}

impl StatusEvent {
    pub fn new(key: &'static str) -> Self {
        Self { key, args: Vec::new() }
    }

    pub fn with_args(key: &'static str, args: Vec<StatusValue>) -> Self {
        Self { key, args }
    }
}

/// Callback registered by the embedding application.
pub type StatusSink = Arc<dyn Fn(StatusEvent) + Send + Sync>;

/// Sink that drops every event, for callers that do not care.
pub fn null_sink() -> StatusSink {
    Arc::new(|_| {})
}

/// Emit a status event to a sink.
pub(crate) fn emit(sink: &StatusSink, key: &'static str, args: Vec<StatusValue>) {
    tracing::debug!(key, ?args, "status");
    sink(StatusEvent::with_args(key, args));
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn sink_receives_events_in_order() {
        let seen: Arc<Mutex<Vec<StatusEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink: StatusSink = Arc::new(move |ev| seen_clone.lock().push(ev));

        emit(&sink, keys::SERVER_WAITING, vec![9090u16.into()]);
        emit(&sink, keys::SERVER_STOPPED, vec![]);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].key, keys::SERVER_WAITING);
        assert_eq!(seen[0].args, vec![StatusValue::Int(9090)]);
        assert_eq!(seen[1].key, keys::SERVER_STOPPED);
        assert!(seen[1].args.is_empty());
    }
}
