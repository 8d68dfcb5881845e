//! UDP socket helpers shared by discovery and transport

use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

use crate::error::{NetworkError, Result};

/// Bind a UDP socket on `0.0.0.0:port` with `SO_REUSEADDR` and join the
/// given multicast group. Reuse matters: the discovery listener and a
/// multicast client may coexist with other processes on the same port.
pub fn bind_multicast(port: u16, group: Ipv4Addr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    let socket = UdpSocket::from_std(socket.into()).map_err(crate::error::Error::Io)?;
    socket
        .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
        .map_err(|e| NetworkError::MulticastJoin(e.to_string()))?;
    Ok(socket)
}

/// Bind a plain UDP socket on `0.0.0.0:port` (0 for ephemeral).
pub async fn bind_udp(port: u16) -> Result<UdpSocket> {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .map_err(|e| NetworkError::BindFailed(e.to_string()).into())
}

/// Addresses of all local interfaces, used to drop our own beacons.
pub fn local_addresses() -> HashSet<IpAddr> {
    let mut addrs: HashSet<IpAddr> = HashSet::new();
    addrs.insert(IpAddr::V4(Ipv4Addr::LOCALHOST));
    match local_ip_address::list_afinet_netifas() {
        Ok(ifas) => {
            for (_name, addr) in ifas {
                addrs.insert(addr);
            }
        }
        Err(e) => {
            tracing::warn!("failed to enumerate local interfaces: {}", e);
        }
    }
    addrs
}

/// Local hostname advertised in beacons.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "Desktop-PC".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_addresses_include_loopback() {
        assert!(local_addresses().contains(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!local_hostname().is_empty());
    }

    #[tokio::test]
    async fn ephemeral_bind_works() {
        let socket = bind_udp(0).await.unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }
}
