//! Local address discovery and classification
//!
//! Best-effort helpers used by the callback channel to decide whether
//! the host is directly reachable from the public internet or needs a
//! port mapping.

use std::io;
use std::net::{IpAddr, UdpSocket};

/// Returns the local network address of this host.
///
/// Uses the UDP-connect trick: connecting a datagram socket to a public
/// address selects the outbound interface without sending any packets.
pub fn local_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}

/// Returns true if `ip` is not publicly routable.
///
/// Covers RFC1918 ranges, loopback and link-local for IPv4, and
/// loopback, unique-local (fc00::/7) and link-local (fe80::/10) for
/// IPv6.
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
