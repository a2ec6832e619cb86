//! Non-blocking UDP socket transport.
//!
//! Features:
//! - Non-blocking I/O on a single IPv4 socket
//! - Best-effort send/receive buffer sizing (failures are logged, not fatal)
//! - Readiness polling for poll-driven event loops

use crate::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::transport::Transport;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

/// UDP transport bound to one local IPv4 port
pub struct UdpTransport {
    socket: UdpSocket,
    recv_buffer_size: usize,
    send_buffer_size: usize,
}

impl UdpTransport {
    /// Create a new UDP transport bound to the given address
    ///
    /// Buffer sizes from `config` are requested from the kernel; if the
    /// kernel refuses, the failure is logged and the default size is kept.
    /// Failing to create or bind the socket is the only fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the socket cannot be created,
    /// switched to non-blocking mode or bound.
    ///
    /// # Examples
    /// ```no_run
    /// use verse_transport::{Transport, TransportConfig, UdpTransport};
    /// use std::net::SocketAddrV4;
    ///
    /// let addr: SocketAddrV4 = "0.0.0.0:4950".parse().unwrap();
    /// let transport = UdpTransport::bind(addr, &TransportConfig::default()).unwrap();
    /// println!("Listening on {:?}", transport.local_addr());
    /// ```
    pub fn bind(addr: SocketAddrV4, config: &TransportConfig) -> TransportResult<Self> {
        let bind_err = |source: io::Error| TransportError::Bind {
            port: addr.port(),
            source,
        };

        let socket2 =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
        socket2.set_nonblocking(true).map_err(bind_err)?;

        if let Err(e) = socket2.set_recv_buffer_size(config.recv_buffer_size) {
            tracing::warn!(
                requested = config.recv_buffer_size,
                "failed to set UDP receive buffer size: {}",
                e
            );
        }
        if let Err(e) = socket2.set_send_buffer_size(config.send_buffer_size) {
            tracing::warn!(
                requested = config.send_buffer_size,
                "failed to set UDP send buffer size: {}",
                e
            );
        }

        // Store the actual buffer sizes chosen by the kernel
        let recv_buffer_size = socket2.recv_buffer_size().unwrap_or(0);
        let send_buffer_size = socket2.send_buffer_size().unwrap_or(0);

        socket2
            .bind(&SocketAddr::V4(addr).into())
            .map_err(bind_err)?;

        let socket: UdpSocket = socket2.into();

        tracing::debug!(
            local = ?socket.local_addr().ok(),
            recv_buffer_size,
            send_buffer_size,
            "UDP transport bound"
        );

        Ok(Self {
            socket,
            recv_buffer_size,
            send_buffer_size,
        })
    }

    /// Bind on all interfaces at `port` (0 = ephemeral)
    ///
    /// # Errors
    ///
    /// See [`UdpTransport::bind`].
    pub fn bind_port(port: u16, config: &TransportConfig) -> TransportResult<Self> {
        Self::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port), config)
    }

    /// Get the receive buffer size in bytes as reported by the kernel
    pub fn recv_buffer_size(&self) -> usize {
        self.recv_buffer_size
    }

    /// Get the send buffer size in bytes as reported by the kernel
    pub fn send_buffer_size(&self) -> usize {
        self.send_buffer_size
    }

    #[cfg(unix)]
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        use std::os::fd::AsRawFd;

        let mut fds = libc::pollfd {
            fd: self.socket.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `fds` points to exactly one initialised pollfd that lives
        // for the duration of the call.
        let rc = unsafe { libc::poll(&mut fds, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(rc > 0)
    }

    #[cfg(not(unix))]
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        // A zero read timeout means "block forever" for std sockets
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_nonblocking(false)?;
        self.socket.set_read_timeout(Some(timeout))?;

        let mut probe = [0u8; 1];
        let ready = match self.socket.peek_from(&mut probe) {
            Ok(_) => true,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                false
            }
            // Truncation and reset errors still mean something is queued
            Err(_) => true,
        };

        self.socket.set_nonblocking(true)?;
        Ok(ready)
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> usize {
        match self.socket.send_to(buf, addr) {
            Ok(sent) => sent,
            Err(e) => {
                tracing::warn!(peer = %addr, len = buf.len(), "UDP send failed: {}", e);
                0
            }
        }
    }

    fn recv_from(&self, buf: &mut [u8]) -> Option<(usize, SocketAddrV4)> {
        match self.socket.recv_from(buf) {
            Ok((len, SocketAddr::V4(from))) => Some((len, from)),
            Ok((_, SocketAddr::V6(from))) => {
                tracing::debug!(peer = %from, "ignoring datagram from IPv6 peer");
                None
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                tracing::warn!("UDP receive failed: {}", e);
                None
            }
        }
    }

    fn wait_for_incoming(&self, timeout: Duration) -> Duration {
        let start = Instant::now();
        if let Err(e) = self.poll_readable(timeout) {
            tracing::warn!("waiting for UDP readiness failed: {}", e);
        }
        start.elapsed()
    }

    fn local_addr(&self) -> Option<SocketAddrV4> {
        match self.socket.local_addr() {
            Ok(SocketAddr::V4(addr)) => Some(addr),
            _ => None,
        }
    }
}
