//! `host[:port]` resolution.

use crate::error::{TransportError, TransportResult};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

/// Resolve `host[:port]` to an IPv4 socket address.
///
/// A trailing `:port` overrides `default_port`. Dotted-quad hosts are parsed
/// directly; anything else goes through the system resolver, which blocks.
///
/// # Errors
///
/// Returns [`TransportError::Address`] if the port does not parse as a
/// `u16`, the host part is empty, or the name has no IPv4 address.
///
/// # Examples
///
/// ```
/// use verse_transport::resolve;
///
/// let addr = resolve("127.0.0.1:7000", 4950).unwrap();
/// assert_eq!(addr.port(), 7000);
///
/// let addr = resolve("127.0.0.1", 4950).unwrap();
/// assert_eq!(addr.port(), 4950);
/// ```
pub fn resolve(host: &str, default_port: u16) -> TransportResult<SocketAddrV4> {
    let fail = |reason: String| TransportError::Address {
        host: host.to_string(),
        reason,
    };

    let (name, port) = match host.rsplit_once(':') {
        Some((name, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| fail(format!("invalid port {port:?}: {e}")))?;
            (name, port)
        }
        None => (host, default_port),
    };

    if name.is_empty() {
        return Err(fail("empty host name".to_string()));
    }

    if let Ok(ip) = name.parse::<Ipv4Addr>() {
        return Ok(SocketAddrV4::new(ip, port));
    }

    let candidates = (name, port)
        .to_socket_addrs()
        .map_err(|e| fail(e.to_string()))?;

    candidates
        .into_iter()
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| fail("no IPv4 address".to_string()))
}
