//! Wire protocol codec
//!
//! Pure encode/parse for the discovery beacon and the unicast handshake.
//! No I/O lives here. The beacon is semicolon-separated ASCII with a fixed
//! four-field shape:
//!
//! ```text
//! WIFI_AUDIO_STREAMER_DISCOVERY;<hostname>;<MULTICAST|UNICAST>;<port>
//! ```
//!
//! Anything that does not match is foreign multicast noise and parses to
//! `None` rather than an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Literal prefix of every discovery beacon.
pub const DISCOVERY_PREFIX: &str = "WIFI_AUDIO_STREAMER_DISCOVERY";

/// Handshake datagram sent by a unicast client.
pub const CLIENT_HELLO: &str = "HELLO_FROM_CLIENT";

/// Handshake reply sent by a unicast server.
pub const SERVER_ACK: &str = "HELLO_ACK";

/// How a stream is delivered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// Group fan-out, no handshake.
    Multicast,
    /// Point-to-point, hello/ack handshake.
    Unicast,
}

impl TransportMode {
    fn wire_word(self) -> &'static str {
        match self {
            TransportMode::Multicast => "MULTICAST",
            TransportMode::Unicast => "UNICAST",
        }
    }

    fn from_wire_word(word: &str) -> Self {
        if word.eq_ignore_ascii_case("MULTICAST") {
            TransportMode::Multicast
        } else {
            TransportMode::Unicast
        }
    }

    pub fn is_multicast(self) -> bool {
        matches!(self, TransportMode::Multicast)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_word())
    }
}

/// A discovered streaming server, as seen by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub ip: IpAddr,
    pub is_multicast: bool,
    pub port: u16,
}

/// Decoded contents of a presence beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub hostname: String,
    pub mode: TransportMode,
    pub port: u16,
}

impl Beacon {
    pub fn new(hostname: impl Into<String>, mode: TransportMode, port: u16) -> Self {
        Self { hostname: hostname.into(), mode, port }
    }

    /// Encode to the wire string. Never fails.
    pub fn encode(&self) -> String {
        format!("{};{};{};{}", DISCOVERY_PREFIX, self.hostname, self.mode.wire_word(), self.port)
    }

    /// Parse a received datagram payload. `None` means "not a beacon":
    /// wrong prefix, wrong field count or a non-numeric port. Malformed
    /// traffic is expected on the discovery group and is silently dropped
    /// by callers.
    pub fn decode(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if !raw.starts_with(DISCOVERY_PREFIX) {
            return None;
        }
        let parts: Vec<&str> = raw.split(';').collect();
        if parts.len() != 4 || parts[0] != DISCOVERY_PREFIX {
            return None;
        }
        let port: u16 = parts[3].parse().ok()?;
        Some(Beacon {
            hostname: parts[1].to_string(),
            mode: TransportMode::from_wire_word(parts[2]),
            port,
        })
    }

    /// Build the `ServerInfo` a client would hold after seeing this beacon
    /// from `ip`.
    pub fn server_info(&self, ip: IpAddr) -> ServerInfo {
        ServerInfo {
            ip,
            is_multicast: self.mode.is_multicast(),
            port: self.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_has_fixed_shape() {
        let b = Beacon::new("Desktop-PC", TransportMode::Multicast, 9090);
        assert_eq!(b.encode(), "WIFI_AUDIO_STREAMER_DISCOVERY;Desktop-PC;MULTICAST;9090");

        let b = Beacon::new("laptop", TransportMode::Unicast, 1024);
        assert_eq!(b.encode(), "WIFI_AUDIO_STREAMER_DISCOVERY;laptop;UNICAST;1024");
    }

    #[test]
    fn decode_rejects_wrong_prefix() {
        assert_eq!(Beacon::decode("SOME_OTHER_PROTOCOL;host;MULTICAST;9090"), None);
        assert_eq!(Beacon::decode(""), None);
        assert_eq!(Beacon::decode("mdns junk"), None);
    }

    #[test]
    fn decode_rejects_wrong_field_count() {
        assert_eq!(Beacon::decode("WIFI_AUDIO_STREAMER_DISCOVERY;host;MULTICAST"), None);
        assert_eq!(Beacon::decode("WIFI_AUDIO_STREAMER_DISCOVERY;host;MULTICAST;9090;extra"), None);
        assert_eq!(Beacon::decode("WIFI_AUDIO_STREAMER_DISCOVERY"), None);
    }

    #[test]
    fn decode_rejects_non_numeric_port() {
        assert_eq!(Beacon::decode("WIFI_AUDIO_STREAMER_DISCOVERY;host;UNICAST;port"), None);
        assert_eq!(Beacon::decode("WIFI_AUDIO_STREAMER_DISCOVERY;host;UNICAST;-1"), None);
        assert_eq!(Beacon::decode("WIFI_AUDIO_STREAMER_DISCOVERY;host;UNICAST;99999999"), None);
    }

    #[test]
    fn decode_trims_trailing_whitespace() {
        // Datagram buffers arrive padded; trailing garbage is trimmed first.
        let b = Beacon::decode("WIFI_AUDIO_STREAMER_DISCOVERY;host;UNICAST;9090\n").unwrap();
        assert_eq!(b.port, 9090);
        assert_eq!(b.mode, TransportMode::Unicast);
    }

    #[test]
    fn mode_word_is_case_insensitive() {
        let b = Beacon::decode("WIFI_AUDIO_STREAMER_DISCOVERY;host;multicast;9090").unwrap();
        assert!(b.mode.is_multicast());
    }

    #[test]
    fn server_info_carries_sender_ip() {
        let b = Beacon::new("host", TransportMode::Multicast, 9090);
        let info = b.server_info("192.168.1.20".parse().unwrap());
        assert_eq!(info.ip, "192.168.1.20".parse::<IpAddr>().unwrap());
        assert!(info.is_multicast);
        assert_eq!(info.port, 9090);
    }

    proptest! {
        #[test]
        fn roundtrip(host in "[A-Za-z0-9][A-Za-z0-9_-]{0,30}", multicast: bool, port: u16) {
            let mode = if multicast { TransportMode::Multicast } else { TransportMode::Unicast };
            let beacon = Beacon::new(host.clone(), mode, port);
            let decoded = Beacon::decode(&beacon.encode()).unwrap();
            prop_assert_eq!(decoded.hostname, host);
            prop_assert_eq!(decoded.mode, mode);
            prop_assert_eq!(decoded.port, port);
        }

        #[test]
        fn arbitrary_noise_never_panics(raw in "\\PC{0,64}") {
            let _ = Beacon::decode(&raw);
        }
    }
}
