//! # Verse Transport
//!
//! Datagram transport layer for the Verse session protocol.
//!
//! This crate provides:
//! - A non-blocking UDP socket with best-effort buffer sizing
//! - `host[:port]` resolution to IPv4 socket addresses
//! - Readiness waiting for poll-driven event loops
//! - A wall-clock [`Timestamp`] for handshake messages
//! - An in-memory datagram network with loss injection for tests
//!
//! Sends and receives never surface errors to the caller: a failed send
//! reports zero bytes and a failed receive reports nothing pending. The
//! session layer above recovers through its resend timer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod clock;
pub mod error;
pub mod memory;
pub mod transport;
pub mod udp;

pub use address::resolve;
pub use clock::Timestamp;
pub use error::{TransportError, TransportResult};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use transport::Transport;
pub use udp::UdpTransport;

use serde::{Deserialize, Serialize};

/// Well-known port hosts listen on and clients connect to by default
pub const DEFAULT_CONNECT_PORT: u16 = 4950;

/// Largest datagram the receive path accepts
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Requested receive buffer size (best-effort)
    pub recv_buffer_size: usize,
    /// Requested send buffer size (best-effort)
    pub send_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
        }
    }
}
