//! Per-connection session state.

use crate::error::SessionError;
use crate::ordering::InboundOrder;
use crate::queue::OutboundQueue;
use crate::stage::{ConnectStage, Role};
use crate::wire::PACKET_ID_SIZE;
use std::fmt;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};
use verse_crypto::credentials::truncate;
use verse_crypto::{DataKey, KeyPair, PublicKey};
use verse_transport::{Timestamp, Transport};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Sessions are addressed by the peer's socket address
pub type SessionId = SocketAddrV4;

/// Login name and password, held only while the handshake needs them
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    name: String,
    password: String,
}

impl Credentials {
    /// Credentials truncated to what fits a login block
    #[must_use]
    pub fn new(name: &str, password: &str) -> Self {
        Self {
            name: truncate(name).to_owned(),
            password: truncate(password).to_owned(),
        }
    }

    /// Login name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Password
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("name", &self.name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A single session with a remote peer.
///
/// Owns its login keypair, the negotiated data key, the outbound queue and
/// the inbound ordering state; all of it is dropped with the session.
pub struct Session {
    pub(crate) role: Role,
    pub(crate) stage: ConnectStage,
    pub(crate) peer: SocketAddrV4,
    pub(crate) keypair: KeyPair,
    pub(crate) peer_key: Option<PublicKey>,
    pub(crate) expected_host_key: Option<PublicKey>,
    pub(crate) data_key: Option<DataKey>,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) host_timestamp: Option<Timestamp>,
    pub(crate) avatar: Option<u32>,
    pub(crate) terminate_reason: Option<String>,
    pub(crate) queue: OutboundQueue,
    pub(crate) inbound: InboundOrder,
    created_at: Instant,
    established_at: Option<Instant>,
}

impl Session {
    /// Client session about to contact `peer`
    #[must_use]
    pub fn client(
        peer: SocketAddrV4,
        keypair: KeyPair,
        credentials: Credentials,
        expected_host_key: Option<PublicKey>,
        resend_interval: Duration,
    ) -> Self {
        let mut session = Self::new(Role::Client, peer, keypair, resend_interval);
        session.credentials = Some(credentials);
        session.expected_host_key = expected_host_key;
        session
    }

    /// Host session for a contact from `peer`
    #[must_use]
    pub fn host(peer: SocketAddrV4, keypair: KeyPair, resend_interval: Duration) -> Self {
        Self::new(Role::Host, peer, keypair, resend_interval)
    }

    fn new(role: Role, peer: SocketAddrV4, keypair: KeyPair, resend_interval: Duration) -> Self {
        Self {
            role,
            stage: ConnectStage::initial(role),
            peer,
            keypair,
            peer_key: None,
            expected_host_key: None,
            data_key: None,
            credentials: None,
            host_timestamp: None,
            avatar: None,
            terminate_reason: None,
            queue: OutboundQueue::new(resend_interval),
            inbound: InboundOrder::default(),
            created_at: Instant::now(),
            established_at: None,
        }
    }

    /// Client or host
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current handshake stage
    #[must_use]
    pub fn stage(&self) -> ConnectStage {
        self.stage
    }

    /// Remote endpoint
    #[must_use]
    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    /// Our public login key
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public()
    }

    /// The peer's public login key, once received
    #[must_use]
    pub fn peer_key(&self) -> Option<&PublicKey> {
        self.peer_key.as_ref()
    }

    /// Negotiated data key.
    ///
    /// The host generates it on contact; the client has it once accepted.
    #[must_use]
    pub fn data_key(&self) -> Option<&DataKey> {
        self.data_key.as_ref()
    }

    /// Avatar id assigned by the host
    #[must_use]
    pub fn avatar(&self) -> Option<u32> {
        self.avatar
    }

    /// Host clock carried in the challenge (client side)
    #[must_use]
    pub fn host_timestamp(&self) -> Option<Timestamp> {
        self.host_timestamp
    }

    /// Reason the session is terminating
    #[must_use]
    pub fn terminate_reason(&self) -> Option<&str> {
        self.terminate_reason.as_deref()
    }

    /// Outbound queue
    #[must_use]
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Inbound ordering state
    #[must_use]
    pub fn inbound(&self) -> &InboundOrder {
        &self.inbound
    }

    /// Packet id the next sequenced datagram will carry
    #[must_use]
    pub fn next_out_packet_id(&self) -> u32 {
        self.queue.next_out_packet_id()
    }

    /// True once sequenced traffic can flow in both directions
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.stage.is_established() && self.data_key.is_some()
    }

    /// True once the peer is known to hold the data key as well.
    ///
    /// A host learns this from the ack of its accept, a client from the
    /// accept itself.
    #[must_use]
    pub fn peer_has_data_key(&self) -> bool {
        self.is_established() && self.queue.control().is_none()
    }

    /// Time since the session was created
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// When the session reached [`ConnectStage::Connected`]
    #[must_use]
    pub fn established_at(&self) -> Option<Instant> {
        self.established_at
    }

    /// Check whether the session can move to `to`
    #[must_use]
    pub fn can_transition(&self, to: ConnectStage) -> bool {
        self.stage.can_transition(self.role, to)
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` if `to` is not the next
    /// stage on this session's handshake path.
    pub fn transition_to(&mut self, to: ConnectStage) -> Result<(), SessionError> {
        if !self.can_transition(to) {
            return Err(SessionError::InvalidTransition {
                from: self.stage,
                to,
            });
        }

        let from = self.stage;
        self.stage = to;

        match to {
            ConnectStage::Connected => {
                self.established_at = Some(Instant::now());
                tracing::info!(peer = %self.peer, role = ?self.role, avatar = ?self.avatar, "session connected");
            }
            ConnectStage::PendingClientCallbackTerminate => {
                self.queue.clear();
                self.credentials = None;
            }
            _ => {}
        }

        tracing::debug!(peer = %self.peer, "stage transition: {:?} -> {:?}", from, to);
        Ok(())
    }

    pub(crate) fn expect_stage(&self, role: Role, stage: ConnectStage) -> Result<(), SessionError> {
        if self.role == role && self.stage == stage {
            Ok(())
        } else {
            Err(SessionError::WrongStage(self.stage))
        }
    }

    /// Park the session for its terminate callback with `reason`.
    ///
    /// Has no effect on a session already terminating.
    pub fn abort(&mut self, reason: &str) {
        if self
            .transition_to(ConnectStage::PendingClientCallbackTerminate)
            .is_ok()
        {
            self.terminate_reason = Some(reason.to_owned());
        }
    }

    /// Take the credentials for the connect request callback
    pub(crate) fn take_credentials(&mut self) -> Option<Credentials> {
        self.credentials.take()
    }

    /// Encrypt `body` under the data key, retain it and send it to the peer.
    ///
    /// Returns the packet id used.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotConnected` before the handshake completes.
    pub fn send_sequenced<T: Transport>(
        &mut self,
        transport: &T,
        body: &[u8],
        now: Instant,
    ) -> Result<u32, SessionError> {
        if !self.stage.is_established() {
            return Err(SessionError::NotConnected);
        }
        let Some(key) = self.data_key.as_ref() else {
            return Err(SessionError::NotConnected);
        };

        let packet_id = self.queue.allocate_packet_id();
        let mut datagram = Vec::with_capacity(PACKET_ID_SIZE + body.len());
        datagram.extend_from_slice(&packet_id.to_be_bytes());
        datagram.extend_from_slice(body);
        key.apply(packet_id, &mut datagram[PACKET_ID_SIZE..]);

        self.queue.send(transport, self.peer, packet_id, datagram, now);
        Ok(packet_id)
    }

    /// Decrypt the body of a received sequenced datagram in place.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotConnected` before the handshake completes.
    pub fn open_sequenced(&self, packet_id: u32, body: &mut [u8]) -> Result<(), SessionError> {
        match self.data_key.as_ref() {
            Some(key) if self.stage.is_established() => {
                key.apply(packet_id, body);
                Ok(())
            }
            _ => Err(SessionError::NotConnected),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("stage", &self.stage)
            .field("peer", &self.peer)
            .field("avatar", &self.avatar)
            .field("retained", &self.queue.len())
            .finish_non_exhaustive()
    }
}
