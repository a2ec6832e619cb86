//! Network context configuration.
//!
//! ```toml
//! port = 4950
//! connect_port = 4950
//! resend_interval_ms = 1000
//! max_pending_pings = 64
//! max_datagram_size = 1400
//! terminate_resends = 8
//!
//! [transport]
//! recv_buffer_size = 262144
//! send_buffer_size = 262144
//! ```
//!
//! Every field is optional; missing fields take the defaults above
//! (except `port`, which defaults to an ephemeral port).

use crate::error::{Error, Result};
use crate::wire::PACKET_ID_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use verse_transport::{DEFAULT_CONNECT_PORT, TransportConfig};

/// Largest UDP payload over IPv4
const MAX_UDP_PAYLOAD: usize = 65_507;

/// Smallest batching limit that still fits a handshake message
const MIN_DATAGRAM_SIZE: usize = 256;

/// Configuration of a [`NetworkContext`](crate::NetworkContext)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Local listen port; `None` binds an ephemeral port
    pub port: Option<u16>,
    /// Remote port used when a host string has no `:port`
    pub connect_port: u16,
    /// Fixed resend interval for unacknowledged datagrams
    pub resend_interval_ms: u64,
    /// Pings queued for the next update; older ones are dropped beyond this
    pub max_pending_pings: usize,
    /// Upper bound on batched sequenced datagrams
    pub max_datagram_size: usize,
    /// Resends of an unacknowledged terminate before giving up on the peer
    pub terminate_resends: u32,
    /// Socket buffer sizes
    pub transport: TransportConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            port: None,
            connect_port: DEFAULT_CONNECT_PORT,
            resend_interval_ms: 1000,
            max_pending_pings: 64,
            max_datagram_size: 1400,
            terminate_resends: 8,
            transport: TransportConfig::default(),
        }
    }
}

impl ContextConfig {
    /// Configuration for a host listening on the well-known port
    #[must_use]
    pub fn host() -> Self {
        Self {
            port: Some(DEFAULT_CONNECT_PORT),
            ..Self::default()
        }
    }

    /// Parse configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid TOML for this type
    /// or fails [`validate`](Self::validate).
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.connect_port == 0 {
            return Err(Error::Config("connect_port must not be 0".into()));
        }
        if self.resend_interval_ms == 0 {
            return Err(Error::Config("resend_interval_ms must be at least 1".into()));
        }
        if self.max_pending_pings == 0 {
            return Err(Error::Config("max_pending_pings must be at least 1".into()));
        }
        if !(MIN_DATAGRAM_SIZE..=MAX_UDP_PAYLOAD).contains(&self.max_datagram_size) {
            return Err(Error::Config(format!(
                "max_datagram_size must be between {} and {}",
                MIN_DATAGRAM_SIZE, MAX_UDP_PAYLOAD
            )));
        }
        Ok(())
    }

    /// Resend interval as a duration
    #[must_use]
    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    /// Room for command bytes in one sequenced datagram
    #[must_use]
    pub fn max_batch_payload(&self) -> usize {
        self.max_datagram_size - PACKET_ID_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.port, None);
        assert_eq!(config.connect_port, 4950);
        assert_eq!(config.resend_interval(), Duration::from_secs(1));
        assert_eq!(config.terminate_resends, 8);
        assert!(config.validate().is_ok());
        assert_eq!(ContextConfig::host().port, Some(4950));
    }

    #[test]
    fn test_partial_toml() {
        let config = ContextConfig::from_toml_str(
            r#"
            port = 6000
            resend_interval_ms = 250

            [transport]
            recv_buffer_size = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.port, Some(6000));
        assert_eq!(config.resend_interval_ms, 250);
        assert_eq!(config.connect_port, 4950);
        assert_eq!(config.transport.recv_buffer_size, 1024);
        assert_eq!(
            config.transport.send_buffer_size,
            TransportConfig::default().send_buffer_size
        );
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ContextConfig::host();
        let text = config.to_toml_string().unwrap();
        assert_eq!(ContextConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_values() {
        for text in [
            "resend_interval_ms = 0",
            "connect_port = 0",
            "max_pending_pings = 0",
            "max_datagram_size = 10",
            "max_datagram_size = 70000",
            "port = \"not a number\"",
        ] {
            assert!(
                matches!(ContextConfig::from_toml_str(text), Err(Error::Config(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            ContextConfig::load("/nonexistent/verse.toml"),
            Err(Error::Config(_))
        ));
    }
}
