//! Presence announcement and peer discovery
//!
//! Two independent, separately cancellable tasks. The announcer multicasts
//! one beacon every few seconds (even for unicast sessions, so peers can
//! find them). The listener joins the discovery group and surfaces every
//! well-formed beacon from a foreign host as a callback invocation.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::net;
use crate::protocol::{Beacon, ServerInfo, TransportMode};

/// Invoked for every discovered peer; hostname keys the record, so a later
/// beacon from the same host overwrites the previous one (latest wins).
pub type DiscoveryCallback = Arc<dyn Fn(String, ServerInfo) + Send + Sync>;

/// Announcer loop: one beacon per interval until cancelled. Send failures
/// are transient network conditions, not reasons to die.
pub async fn run_announcer(
    config: EngineConfig,
    mode: TransportMode,
    port: u16,
    token: CancellationToken,
) {
    let socket = match net::bind_udp(0).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("announcer socket bind failed: {}", e);
            return;
        }
    };
    let beacon = Beacon::new(net::local_hostname(), mode, port).encode();
    let target = (config.multicast_group, config.discovery_port);

    tracing::info!(%mode, port, "announcing presence");
    loop {
        if let Err(e) = socket.send_to(beacon.as_bytes(), target).await {
            tracing::debug!("beacon send failed: {}", e);
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(config.announce_interval()) => {}
        }
    }
    tracing::debug!("announcer stopped");
}

/// Listener loop: joins the discovery group and reports foreign beacons
/// until cancelled. The receive timeout is purely a cancellation poll, not
/// a failure signal.
pub async fn run_listener(
    config: EngineConfig,
    callback: DiscoveryCallback,
    token: CancellationToken,
) {
    let socket = match net::bind_multicast(config.discovery_port, config.multicast_group) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("discovery listener failed to join group: {}", e);
            return;
        }
    };
    let local = net::local_addresses();
    let mut buf = [0u8; 1024];

    tracing::info!(port = config.discovery_port, "listening for peers");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            received = timeout(config.listen_timeout(), socket.recv_from(&mut buf)) => {
                match received {
                    Err(_elapsed) => continue, // quiet network, poll again
                    Ok(Err(e)) => {
                        tracing::debug!("discovery receive error: {}", e);
                        continue;
                    }
                    Ok(Ok((len, src))) => {
                        if let Some((hostname, info)) = parse_beacon(&buf[..len], src.ip(), &local) {
                            callback(hostname, info);
                        }
                    }
                }
            }
        }
    }

    let _ = socket.leave_multicast_v4(config.multicast_group, std::net::Ipv4Addr::UNSPECIFIED);
    tracing::debug!("discovery listener stopped");
}

/// Decode one datagram into a discovery event. Malformed payloads and our
/// own beacons yield `None`.
fn parse_beacon(
    payload: &[u8],
    sender: IpAddr,
    local: &HashSet<IpAddr>,
) -> Option<(String, ServerInfo)> {
    if local.contains(&sender) {
        return None;
    }
    let text = std::str::from_utf8(payload).ok()?;
    let beacon = Beacon::decode(text)?;
    let info = beacon.server_info(sender);
    Some((beacon.hostname, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn local_set() -> HashSet<IpAddr> {
        let mut set = HashSet::new();
        set.insert(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)));
        set.insert(IpAddr::V4(Ipv4Addr::LOCALHOST));
        set
    }

    #[test]
    fn foreign_beacon_is_reported() {
        let payload = b"WIFI_AUDIO_STREAMER_DISCOVERY;other-pc;MULTICAST;9090";
        let sender: IpAddr = "192.168.1.20".parse().unwrap();
        let (hostname, info) = parse_beacon(payload, sender, &local_set()).unwrap();
        assert_eq!(hostname, "other-pc");
        assert_eq!(info.ip, sender);
        assert!(info.is_multicast);
        assert_eq!(info.port, 9090);
    }

    #[test]
    fn own_beacon_is_filtered() {
        let payload = b"WIFI_AUDIO_STREAMER_DISCOVERY;me;MULTICAST;9090";
        let sender: IpAddr = "192.168.1.5".parse().unwrap();
        assert!(parse_beacon(payload, sender, &local_set()).is_none());
    }

    #[test]
    fn noise_is_dropped_silently() {
        let sender: IpAddr = "192.168.1.20".parse().unwrap();
        assert!(parse_beacon(b"SSDP junk", sender, &local_set()).is_none());
        assert!(parse_beacon(&[0xff, 0xfe, 0x00], sender, &local_set()).is_none());
    }

    #[tokio::test]
    async fn announcer_stops_on_cancel() {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_announcer(
            EngineConfig::default(),
            TransportMode::Multicast,
            9090,
            token.clone(),
        ));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("announcer did not stop after cancel")
            .unwrap();
    }

    // Needs a multicast-capable network; loopback-only environments drop
    // group traffic.
    #[tokio::test]
    #[ignore = "requires multicast-capable network"]
    async fn announce_and_listen_end_to_end() {
        let config = EngineConfig::default();
        let token = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        // Listener with an empty local set so our own beacon is visible.
        let listener_config = config.clone();
        let listener_token = token.clone();
        tokio::spawn(async move {
            let socket =
                net::bind_multicast(listener_config.discovery_port, listener_config.multicast_group)
                    .unwrap();
            let mut buf = [0u8; 1024];
            loop {
                tokio::select! {
                    _ = listener_token.cancelled() => break,
                    r = socket.recv_from(&mut buf) => {
                        if let Ok((len, src)) = r {
                            if let Some(found) = parse_beacon(&buf[..len], src.ip(), &HashSet::new()) {
                                let _ = tx.send(found);
                            }
                        }
                    }
                }
            }
        });

        tokio::spawn(run_announcer(config, TransportMode::Multicast, 9090, token.clone()));

        // Two announce cycles.
        let found = tokio::time::timeout(std::time::Duration::from_secs(7), rx.recv())
            .await
            .expect("no beacon within two announce cycles")
            .unwrap();
        assert!(found.1.is_multicast);
        assert_eq!(found.1.port, 9090);
        token.cancel();
    }
}
