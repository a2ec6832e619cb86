//! Transport error types.

use std::io;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Host name did not resolve or its port specifier is invalid
    #[error("cannot resolve {host:?}: {reason}")]
    Address {
        /// The host string as given by the caller
        host: String,
        /// Why resolution failed
        reason: String,
    },

    /// The local socket could not be created or bound
    #[error("failed to bind UDP socket on port {port}: {source}")]
    Bind {
        /// Requested local port (0 = ephemeral)
        port: u16,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No transport has been opened and none can be opened on demand
    #[error("transport is not open")]
    NotOpen,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
