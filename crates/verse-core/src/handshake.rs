//! Handshake steps.
//!
//! ```text
//! Client                                         Host
//!   |  stage 0: client key                         |
//!   |--------------------------------------------->|  Idle -> Contacted
//!   |  stage 1: version, timestamp, host key       |
//!   |<---------------------------------------------|
//!   |  stage 2: E_host(name | password)            |  Contact -> Contacted
//!   |--------------------------------------------->|  -> PendingAccept
//!   |                                              |  Contacted -> PendingHostCallback
//!   |                          (application decides, then calls accept)
//!   |  accept: avatar, E_client(data key)          |  PendingDecision -> Connected
//!   |<---------------------------------------------|
//!   |  ack(0)                                      |
//!   |--------------------------------------------->|
//! ```
//!
//! Each step checks that the session sits in the stage the message
//! answers. A message for any other stage is a resend of something
//! already handled and is ignored, so resends are harmless. Every step
//! returns the datagram to send next; the caller owns the socket.

use crate::PROTOCOL_VERSION;
use crate::error::{Error, Result, SessionError};
use crate::message::Message;
use crate::session::Session;
use crate::stage::{ConnectStage, Role};
use crate::wire::CONTROL_PACKET_ID;
use verse_crypto::{Block, DataKey, PublicKey, pack_credentials, unpack_credentials};
use verse_transport::Timestamp;
use zeroize::Zeroize;

/// Terminate reason when the host speaks another protocol version
pub const REASON_VERSION_MISMATCH: &str = "protocol version mismatch";

/// Terminate reason when the host key differs from the expected one
pub const REASON_HOST_KEY_MISMATCH: &str = "host key mismatch";

impl Session {
    /// Stage 0 datagram announcing our public key
    pub fn contact_datagram(&self) -> Result<Vec<u8>> {
        Ok(Message::datagram(
            CONTROL_PACKET_ID,
            &[Message::Contact {
                client_key: self.keypair.public().clone(),
            }],
        )?)
    }

    /// Host: a client made contact.
    ///
    /// Stores the client key, generates the session's data key and returns
    /// the stage 1 challenge.
    pub fn on_contact(&mut self, client_key: PublicKey, now: Timestamp) -> Result<Vec<u8>> {
        self.expect_stage(Role::Host, ConnectStage::Idle)?;

        let data_key = DataKey::random()?;
        self.transition_to(ConnectStage::Contacted)?;
        self.peer_key = Some(client_key);
        self.data_key = Some(data_key);

        tracing::debug!(peer = %self.peer, "contact received, sending challenge");
        Ok(Message::datagram(
            CONTROL_PACKET_ID,
            &[Message::Challenge {
                version: PROTOCOL_VERSION,
                timestamp: now,
                host_key: self.keypair.public().clone(),
            }],
        )?)
    }

    /// Client: the host challenged us.
    ///
    /// Returns the stage 2 login, or `None` if the host key is not the one
    /// the caller expected, in which case the session is terminating.
    pub fn on_challenge(
        &mut self,
        host_key: PublicKey,
        timestamp: Timestamp,
    ) -> Result<Option<Vec<u8>>> {
        self.expect_stage(Role::Client, ConnectStage::Contact)?;

        if let Some(expected) = &self.expected_host_key {
            if *expected != host_key {
                let err = Error::HostKeyMismatch {
                    expected: expected.fingerprint(),
                    actual: host_key.fingerprint(),
                };
                tracing::warn!(peer = %self.peer, "handshake aborted: {}", err);
                self.abort(REASON_HOST_KEY_MISMATCH);
                return Ok(None);
            }
        }

        self.transition_to(ConnectStage::Contacted)?;
        self.host_timestamp = Some(timestamp);

        let credentials = self
            .credentials
            .as_ref()
            .ok_or(SessionError::WrongStage(self.stage))?;
        let mut plaintext = pack_credentials(credentials.name(), credentials.password());
        let encrypted = host_key.encrypt(&plaintext);
        plaintext.zeroize();
        let ciphertext = encrypted?;

        self.peer_key = Some(host_key);
        self.transition_to(ConnectStage::PendingAccept)?;

        tracing::debug!(peer = %self.peer, "challenge received, sending login");
        Ok(Some(Message::datagram(
            CONTROL_PACKET_ID,
            &[Message::Login { ciphertext }],
        )?))
    }

    /// Client: the host announced an unsupported protocol version.
    ///
    /// No key material from the challenge is stored.
    pub fn on_incompatible_challenge(&mut self, version: u8) -> Result<()> {
        self.expect_stage(Role::Client, ConnectStage::Contact)?;
        let err = Error::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote: version,
        };
        tracing::warn!(peer = %self.peer, "handshake aborted: {}", err);
        self.abort(REASON_VERSION_MISMATCH);
        Ok(())
    }

    /// Host: the client sent its encrypted credentials.
    ///
    /// Stops resending the challenge and parks the session until the
    /// connect request callback has fired.
    pub fn on_login(&mut self, ciphertext: &Block) -> Result<()> {
        self.expect_stage(Role::Host, ConnectStage::Contacted)?;

        let mut plaintext = self.keypair.private().decrypt(ciphertext);
        let (name, mut password) = unpack_credentials(&plaintext);
        plaintext.zeroize();

        self.credentials = Some(crate::session::Credentials::new(&name, &password));
        password.zeroize();
        self.queue.clear_control();
        self.transition_to(ConnectStage::PendingHostCallback)?;

        tracing::debug!(peer = %self.peer, name = %name, "login received");
        Ok(())
    }

    /// Host: the application accepted the login.
    ///
    /// Returns the accept datagram carrying `avatar` and the data key
    /// encrypted under the client's key.
    pub fn accept(&mut self, avatar: u32) -> Result<Vec<u8>> {
        self.expect_stage(Role::Host, ConnectStage::PendingDecision)?;

        let (Some(client_key), Some(data_key)) = (&self.peer_key, &self.data_key) else {
            return Err(SessionError::NotConnected.into());
        };
        let encrypted_key = client_key.encrypt(data_key.as_block())?;

        self.avatar = Some(avatar);
        self.transition_to(ConnectStage::Connected)?;

        Ok(Message::datagram(
            CONTROL_PACKET_ID,
            &[Message::Accept {
                avatar,
                encrypted_key,
            }],
        )?)
    }

    /// Client: the host accepted us.
    ///
    /// Stores the data key and parks the session until the accept callback
    /// has fired. Sequenced traffic may flow from here on.
    pub fn on_accept(&mut self, avatar: u32, encrypted_key: &Block) -> Result<()> {
        self.expect_stage(Role::Client, ConnectStage::PendingAccept)?;

        let mut block = self.keypair.private().decrypt(encrypted_key);
        self.data_key = Some(DataKey::from_block(block));
        block.zeroize();

        self.avatar = Some(avatar);
        self.credentials = None;
        self.queue.clear_control();
        self.transition_to(ConnectStage::PendingClientCallbackAccept)?;

        tracing::debug!(peer = %self.peer, avatar, "accepted by host");
        Ok(())
    }

    /// Either side: the peer terminated the session
    pub fn on_terminate(&mut self, reason: &str) {
        tracing::info!(peer = %self.peer, reason, "session terminated by peer");
        self.abort(reason);
    }
}
