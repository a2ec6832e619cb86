//! Transport trait abstraction.
//!
//! The session layer talks to the network only through [`Transport`], so
//! the same state machine runs over a real UDP socket or over the
//! in-memory network used by tests.

use std::net::SocketAddrV4;
use std::time::Duration;

/// Best-effort datagram transport.
///
/// Implementations must never block in [`send_to`](Transport::send_to) or
/// [`recv_from`](Transport::recv_from); the only blocking call is
/// [`wait_for_incoming`](Transport::wait_for_incoming), bounded by its timeout.
///
/// # Examples
///
/// ```
/// use verse_transport::{MemoryNetwork, Transport};
///
/// let network = MemoryNetwork::new();
/// let a = network.endpoint(7000);
/// let b = network.endpoint(7001);
///
/// assert_eq!(a.send_to(b"hello", b.address()), 5);
///
/// let mut buf = [0u8; 64];
/// let (len, from) = b.recv_from(&mut buf).expect("datagram queued");
/// assert_eq!(&buf[..len], b"hello");
/// assert_eq!(from, a.address());
/// ```
pub trait Transport {
    /// Send one datagram.
    ///
    /// Returns the number of bytes handed to the network, or zero when the
    /// send failed. Failures are logged by the implementation, never retried.
    fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> usize;

    /// Receive one pending datagram into `buf`.
    ///
    /// Returns `None` when nothing is pending.
    fn recv_from(&self, buf: &mut [u8]) -> Option<(usize, SocketAddrV4)>;

    /// Block for at most `timeout` until a datagram is readable.
    ///
    /// Returns the time actually spent waiting.
    fn wait_for_incoming(&self, timeout: Duration) -> Duration;

    /// The local address datagrams are received on, if known
    fn local_addr(&self) -> Option<SocketAddrV4>;
}
