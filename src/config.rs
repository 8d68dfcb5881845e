//! Engine configuration
//!
//! Runtime knobs for discovery, transport and the web relay. Persistence is
//! the embedding application's concern; this struct only carries defaults
//! and serde derives so hosts can load it from wherever they keep settings.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Engine-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Primary audio stream port.
    pub stream_port: u16,
    /// Reverse microphone sub-channel port.
    pub mic_port: u16,
    /// Discovery beacon port.
    pub discovery_port: u16,
    /// Multicast group shared by discovery and multicast streaming.
    pub multicast_group: Ipv4Addr,
    /// HTTP/websocket port of the web relay.
    pub relay_port: u16,
    /// Seconds between presence beacons.
    pub announce_interval_secs: u64,
    /// Discovery listener receive timeout, used to poll for cancellation.
    pub listen_timeout_secs: u64,
    /// How long a client waits for the handshake ack.
    pub handshake_timeout_secs: u64,
    /// Delay between stopping a capture device and reopening another one.
    pub settle_delay_millis: u64,
    /// Device-name substrings that mark a capture device as a microphone,
    /// matched case-insensitively. Locale-specific terms go here.
    pub mic_keywords: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_port: 9090,
            mic_port: 9092,
            discovery_port: 9091,
            multicast_group: Ipv4Addr::new(239, 255, 0, 1),
            relay_port: 8080,
            announce_interval_secs: 3,
            listen_timeout_secs: 5,
            handshake_timeout_secs: 5,
            settle_delay_millis: 1000,
            mic_keywords: vec!["mic".to_string(), "麦克风".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_millis)
    }

    /// True when the device name matches one of the microphone keywords.
    pub fn is_microphone_name(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.mic_keywords.iter().any(|kw| lower.contains(&kw.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.stream_port, 9090);
        assert_eq!(cfg.discovery_port, 9091);
        assert_eq!(cfg.mic_port, 9092);
        assert_eq!(cfg.multicast_group, Ipv4Addr::new(239, 255, 0, 1));
    }

    #[test]
    fn microphone_name_matching() {
        let cfg = EngineConfig::default();
        assert!(cfg.is_microphone_name("Microphone (Realtek)"));
        assert!(cfg.is_microphone_name("USB MIC"));
        assert!(cfg.is_microphone_name("麦克风阵列"));
        assert!(!cfg.is_microphone_name("Stereo Mix"));
    }
}
