//! Routable address discovery for the broker endpoint.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Failure to find an address remote workers can reach.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Socket plumbing failed.
    #[error("could not determine a routable address: {0}")]
    Io(#[from] std::io::Error),
    /// The host only resolved to loopback; workers on other machines would
    /// never reach it.
    #[error("local address resolves to {0}; refusing to publish a loopback endpoint")]
    Loopback(IpAddr),
}

/// The IPv4 address this host is reached on from the outside.
///
/// Connecting a UDP socket towards a public address and reading the local
/// endpoint picks the interface the kernel would route through, which on a
/// multi-homed host is what `gethostbyname` style lookups get wrong. No
/// packet is sent.
pub fn routable_ipv4() -> Result<Ipv4Addr, NetError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(("8.8.8.8", 80))?;
    let addr = socket.local_addr()?;
    match addr.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() => Ok(ip),
        ip => Err(NetError::Loopback(ip)),
    }
}
