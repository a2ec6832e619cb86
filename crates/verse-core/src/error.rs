//! Error types for the Verse session core.

use crate::stage::ConnectStage;
use thiserror::Error;

/// Core protocol errors
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error, including unresolvable addresses
    #[error("transport error: {0}")]
    Transport(#[from] verse_transport::TransportError),

    /// Cryptographic error
    #[error("crypto error: {0}")]
    Crypto(#[from] verse_crypto::CryptoError),

    /// Wire encoding or decoding error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Session error
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Host and client disagree on the protocol version
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    VersionMismatch {
        /// Our protocol version
        local: u8,
        /// The version the host announced
        remote: u8,
    },

    /// The host's public key differs from the one the caller expected
    #[error("host key mismatch: expected {expected}, got {actual}")]
    HostKeyMismatch {
        /// Fingerprint of the expected key
        expected: String,
        /// Fingerprint of the received key
        actual: String,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Wire-level errors. Datagrams that fail to decode are dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes for the fields the command declares
    #[error("message too short: expected at least {expected}, got {actual}")]
    ShortMessage {
        /// Bytes needed to continue decoding
        expected: usize,
        /// Bytes left in the datagram
        actual: usize,
    },

    /// Command id without a decoder
    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    /// Handshake stage byte outside 0..=2
    #[error("unknown handshake stage: {0}")]
    UnknownStage(u8),

    /// Sub-command byte reserved for a historical placeholder
    #[error("unsupported variant {variant} of command {command}")]
    UnsupportedVariant {
        /// Command id
        command: u8,
        /// Second byte of the command
        variant: u8,
    },

    /// Zero-terminated string runs past its field width
    #[error("string field exceeds {0} bytes")]
    StringTooLong(usize),

    /// Public key material cannot be used
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Field value outside its defined range
    #[error("invalid value {value} for {field}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Offending value
        value: u32,
    },
}

/// Session-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Stage transition not in the handshake graph
    #[error("invalid stage transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current stage
        from: ConnectStage,
        /// Requested stage
        to: ConnectStage,
    },

    /// Operation requires a different stage
    #[error("operation not valid in stage {0:?}")]
    WrongStage(ConnectStage),

    /// No session for the given address, or no current session
    #[error("no such session")]
    NoSession,

    /// The session has no data key yet
    #[error("session is not connected")]
    NotConnected,
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
