//! The network context: socket, sessions and application handlers.
//!
//! Everything runs on the caller's thread. The application calls
//! [`NetworkContext::receive`] to drain the socket and
//! [`NetworkContext::update`] to run resend timers and fire callbacks,
//! optionally sleeping in [`NetworkContext::wait_for_incoming`] between
//! rounds:
//!
//! ```no_run
//! use std::time::Duration;
//! use verse_core::{ContextConfig, NetworkContext};
//!
//! let mut ctx = NetworkContext::new(ContextConfig::default())?;
//! ctx.connect("localhost", "alice", "secret", None)?;
//! loop {
//!     ctx.wait_for_incoming(Duration::from_millis(100));
//!     ctx.receive();
//!     ctx.update();
//! }
//! # Ok::<(), verse_core::Error>(())
//! ```

use crate::command::Command;
use crate::config::ContextConfig;
use crate::dispatch::{CommandHandler, dispatch};
use crate::error::{Error, Result, SessionError};
use crate::handler::SessionHandler;
use crate::message::{Message, Messages};
use crate::queue::OutboundQueue;
use crate::session::{Credentials, Session, SessionId};
use crate::stage::{ConnectStage, Role};
use crate::wire::{CONTROL_PACKET_ID, Writer, split_header};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};
use verse_crypto::{KeyPair, PublicKey};
use verse_transport::{
    MAX_DATAGRAM_SIZE, Timestamp, Transport, TransportConfig, TransportError, TransportResult,
    UdpTransport, resolve,
};

type Binder<T> = fn(u16, &TransportConfig) -> TransportResult<T>;

fn no_binder<T>(_port: u16, _config: &TransportConfig) -> TransportResult<T> {
    Err(TransportError::NotOpen)
}

/// Terminate of a session already destroyed, retained until acknowledged
#[derive(Debug)]
struct Closing {
    packet_id: u32,
    queue: OutboundQueue,
}

/// Owner of the socket, every session and the application handlers
pub struct NetworkContext<T: Transport = UdpTransport> {
    config: ContextConfig,
    transport: Option<T>,
    binder: Binder<T>,
    sessions: HashMap<SessionId, Session>,
    closing: HashMap<SessionId, Closing>,
    current: Option<SessionId>,
    host_keypair: Option<KeyPair>,
    pending_pings: VecDeque<(SocketAddrV4, String)>,
    session_handler: Option<Box<dyn SessionHandler>>,
    command_handler: Option<Box<dyn CommandHandler>>,
    recv_buf: Vec<u8>,
}

impl NetworkContext<UdpTransport> {
    /// Context over UDP. The socket is bound on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails validation.
    pub fn new(config: ContextConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, None, UdpTransport::bind_port))
    }
}

impl<T: Transport> NetworkContext<T> {
    /// Context over an already open transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails validation.
    pub fn with_transport(config: ContextConfig, transport: T) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Some(transport), no_binder::<T>))
    }

    fn build(config: ContextConfig, transport: Option<T>, binder: Binder<T>) -> Self {
        Self {
            config,
            transport,
            binder,
            sessions: HashMap::new(),
            closing: HashMap::new(),
            current: None,
            host_keypair: None,
            pending_pings: VecDeque::new(),
            session_handler: None,
            command_handler: None,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Open the socket if it is not open yet and return its local address.
    ///
    /// `port` overrides the configured port; with neither, an ephemeral
    /// port is bound. Calls after the first return the existing socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if binding fails.
    pub fn open(&mut self, port: Option<u16>) -> Result<SocketAddrV4> {
        if self.transport.is_none() {
            let port = port.or(self.config.port).unwrap_or(0);
            let transport = (self.binder)(port, &self.config.transport)?;
            tracing::info!(
                local = ?transport.local_addr(),
                "socket opened"
            );
            self.transport = Some(transport);
        }
        self.local_addr()
            .ok_or(Error::Transport(TransportError::NotOpen))
    }

    /// Local socket address, once open
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        self.transport.as_ref().and_then(|t| t.local_addr())
    }

    /// The underlying transport, once open
    #[must_use]
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Install the session lifecycle handler
    pub fn set_session_handler(&mut self, handler: Box<dyn SessionHandler>) {
        self.session_handler = Some(handler);
    }

    /// Install the command handler
    pub fn set_command_handler(&mut self, handler: Box<dyn CommandHandler>) {
        self.command_handler = Some(handler);
    }

    /// Use `keypair` for every host-side session from now on
    pub fn set_host_keypair(&mut self, keypair: KeyPair) {
        self.host_keypair = Some(keypair);
    }

    /// Public key clients see when contacting this context.
    ///
    /// Generated on first use if none was set.
    pub fn host_public_key(&mut self) -> PublicKey {
        self.host_keypair
            .get_or_insert_with(KeyPair::random)
            .public()
            .clone()
    }

    /// Session with `id`
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// All live sessions
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Session used when no address is given
    #[must_use]
    pub fn current(&self) -> Option<SessionId> {
        self.current
    }

    /// Make `id` the current session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoSession` if there is no such session.
    pub fn set_current(&mut self, id: SessionId) -> Result<()> {
        if !self.sessions.contains_key(&id) {
            return Err(SessionError::NoSession.into());
        }
        self.current = Some(id);
        Ok(())
    }

    /// Start a handshake with `host` (`name[:port]`).
    ///
    /// The new session becomes the current one. A previous session with
    /// the same peer is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the host does not resolve or the
    /// socket cannot be opened.
    pub fn connect(
        &mut self,
        host: &str,
        name: &str,
        password: &str,
        expected_host_key: Option<PublicKey>,
    ) -> Result<SessionId> {
        let peer = resolve(host, self.config.connect_port)?;
        self.open(None)?;
        let transport = self.transport.as_ref().ok_or(TransportError::NotOpen)?;

        let mut session = Session::client(
            peer,
            KeyPair::random(),
            Credentials::new(name, password),
            expected_host_key,
            self.config.resend_interval(),
        );
        let contact = session.contact_datagram()?;
        session
            .queue
            .send_control(transport, peer, contact, Instant::now());

        self.closing.remove(&peer);
        if self.sessions.insert(peer, session).is_some() {
            tracing::debug!(peer = %peer, "replaced existing session");
        }
        self.current = Some(peer);
        tracing::info!(peer = %peer, "connecting");
        Ok(peer)
    }

    /// Accept the login of the client at `id`, assigning `avatar`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if there is no such session or it is not
    /// waiting for a decision.
    pub fn accept(&mut self, id: SessionId, avatar: u32) -> Result<()> {
        let transport = self.transport.as_ref().ok_or(TransportError::NotOpen)?;
        let session = self.sessions.get_mut(&id).ok_or(SessionError::NoSession)?;
        let datagram = session.accept(avatar)?;
        session
            .queue
            .send_control(transport, id, datagram, Instant::now());
        Ok(())
    }

    /// End the session with `addr`, or the current session.
    ///
    /// The session is destroyed immediately and no callback fires locally.
    /// Once the peer holds the data key the terminate goes out encrypted
    /// and sequenced, and is resent by [`update`](Self::update) until the
    /// peer acknowledges it or `terminate_resends` resends went
    /// unanswered. Before that it is sent once in the clear. With an
    /// address that has no session the clear message is still sent.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoSession` if no address is given and there
    /// is no current session.
    pub fn terminate(&mut self, addr: Option<SocketAddrV4>, reason: &str) -> Result<()> {
        let target = addr.or(self.current).ok_or(SessionError::NoSession)?;
        self.open(None)?;
        let transport = self.transport.as_ref().ok_or(TransportError::NotOpen)?;

        if self.current == Some(target) {
            self.current = None;
        }

        match self.sessions.remove(&target) {
            Some(mut session) => {
                let message = Message::Terminate {
                    packet_id: session.next_out_packet_id(),
                    reason: reason.to_owned(),
                };
                if session.peer_has_data_key() {
                    let mut w = Writer::new();
                    message.encode(&mut w)?;
                    let packet_id =
                        session.send_sequenced(transport, &w.into_bytes(), Instant::now())?;
                    session.queue.retain_only(packet_id);
                    self.closing.insert(
                        target,
                        Closing {
                            packet_id,
                            queue: session.queue,
                        },
                    );
                } else {
                    send_clear(transport, target, &[message])?;
                }
            }
            None => {
                send_clear(
                    transport,
                    target,
                    &[Message::Terminate {
                        packet_id: CONTROL_PACKET_ID,
                        reason: reason.to_owned(),
                    }],
                )?;
            }
        }

        tracing::info!(peer = %target, reason, "session terminated locally");
        Ok(())
    }

    /// Terminates sent but not acknowledged yet
    #[must_use]
    pub fn pending_terminations(&self) -> usize {
        self.closing.len()
    }

    /// Send a connectionless ping to `host` (`name[:port]`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the host does not resolve or the
    /// socket cannot be opened.
    pub fn send_ping(&mut self, host: &str, message: &str) -> Result<()> {
        let target = resolve(host, self.config.connect_port)?;
        self.open(None)?;
        let transport = self.transport.as_ref().ok_or(TransportError::NotOpen)?;
        send_clear(
            transport,
            target,
            &[Message::Ping {
                target,
                message: message.to_owned(),
            }],
        )?;
        Ok(())
    }

    /// Send one command over the current session
    ///
    /// # Errors
    ///
    /// See [`send_commands_to`](Self::send_commands_to).
    pub fn send_command(&mut self, command: &Command) -> Result<()> {
        self.send_commands(std::slice::from_ref(command))
    }

    /// Send commands over the current session, batched into datagrams
    ///
    /// # Errors
    ///
    /// See [`send_commands_to`](Self::send_commands_to).
    pub fn send_commands(&mut self, commands: &[Command]) -> Result<()> {
        let id = self.current.ok_or(SessionError::NoSession)?;
        self.send_commands_to(id, commands)
    }

    /// Send commands to the session `id`.
    ///
    /// Commands are packed back to back into sequenced datagrams of at
    /// most `max_datagram_size` bytes; a single larger command travels
    /// alone. Nothing is sent if any command fails to encode.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoSession` or `SessionError::NotConnected`
    /// if the session cannot carry commands, or [`Error::Wire`] if a
    /// command cannot be encoded.
    pub fn send_commands_to(&mut self, id: SessionId, commands: &[Command]) -> Result<()> {
        let encoded = commands
            .iter()
            .map(Command::to_bytes)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let limit = self.config.max_batch_payload();
        let transport = self.transport.as_ref().ok_or(TransportError::NotOpen)?;
        let session = self.sessions.get_mut(&id).ok_or(SessionError::NoSession)?;
        if !session.is_established() {
            return Err(SessionError::NotConnected.into());
        }

        let now = Instant::now();
        let mut batch = Vec::with_capacity(limit);
        for bytes in encoded {
            if !batch.is_empty() && batch.len() + bytes.len() > limit {
                session.send_sequenced(transport, &batch, now)?;
                batch.clear();
            }
            batch.extend_from_slice(&bytes);
        }
        if !batch.is_empty() {
            session.send_sequenced(transport, &batch, now)?;
        }
        Ok(())
    }

    /// Block until the socket is readable or `timeout` passes.
    ///
    /// Returns the time spent waiting; zero if the socket is not open.
    pub fn wait_for_incoming(&self, timeout: Duration) -> Duration {
        self.transport
            .as_ref()
            .map_or(Duration::ZERO, |t| t.wait_for_incoming(timeout))
    }

    /// Drain the socket and process every datagram.
    ///
    /// Returns the number of datagrams read. Callbacks are deferred to the
    /// next [`update`](Self::update), except command callbacks, which run
    /// as commands are released in order.
    pub fn receive(&mut self) -> usize {
        let mut buf = std::mem::take(&mut self.recv_buf);
        let mut count = 0;
        while let Some((len, from)) = self.transport.as_ref().and_then(|t| t.recv_from(&mut buf)) {
            self.handle_datagram(from, &buf[..len]);
            count += 1;
        }
        self.recv_buf = buf;
        count
    }

    /// Run resend timers and fire pending callbacks
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// [`update`](Self::update) with an explicit clock reading
    pub fn update_at(&mut self, now: Instant) {
        if let Some(transport) = self.transport.as_ref() {
            for session in self.sessions.values_mut() {
                session.queue.resend_due(transport, session.peer, now);
            }

            let max_resends = self.config.terminate_resends;
            let interval = self.config.resend_interval();
            self.closing.retain(|peer, closing| {
                let Some(entry) = closing.queue.get(closing.packet_id) else {
                    return false;
                };
                if entry.sends() > max_resends {
                    if now.saturating_duration_since(entry.last_sent()) < interval {
                        return true;
                    }
                    tracing::info!(peer = %peer, "terminate never acknowledged, giving up");
                    return false;
                }
                closing.queue.resend_due(transport, *peer, now);
                true
            });
        }

        let mut due: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                matches!(
                    s.stage(),
                    ConnectStage::PendingHostCallback
                        | ConnectStage::PendingClientCallbackAccept
                        | ConnectStage::PendingClientCallbackTerminate
                )
            })
            .map(|(id, _)| *id)
            .collect();
        due.sort_unstable();
        for id in due {
            self.fire_callback(id);
        }

        while let Some((from, message)) = self.pending_pings.pop_front() {
            if let Some(handler) = self.session_handler.as_mut() {
                handler.on_ping(from, &message);
            }
        }
    }

    fn fire_callback(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        match session.stage() {
            ConnectStage::PendingHostCallback => {
                let credentials = session.take_credentials();
                if let Err(err) = session.transition_to(ConnectStage::PendingDecision) {
                    tracing::warn!(peer = %id, "{}", err);
                    return;
                }
                if let (Some(handler), Some(credentials)) =
                    (self.session_handler.as_mut(), credentials.as_ref())
                {
                    handler.on_connect_request(id, credentials.name(), credentials.password());
                }
            }
            ConnectStage::PendingClientCallbackAccept => {
                let avatar = session.avatar().unwrap_or_default();
                if let Err(err) = session.transition_to(ConnectStage::Connected) {
                    tracing::warn!(peer = %id, "{}", err);
                    return;
                }
                if let Some(handler) = self.session_handler.as_mut() {
                    handler.on_accept(id, avatar);
                }
            }
            ConnectStage::PendingClientCallbackTerminate => {
                let reason = session.terminate_reason.take().unwrap_or_default();
                self.sessions.remove(&id);
                if self.current == Some(id) {
                    self.current = None;
                }
                if let Some(handler) = self.session_handler.as_mut() {
                    handler.on_terminate(id, &reason);
                }
            }
            _ => {}
        }
    }

    fn handle_datagram(&mut self, from: SocketAddrV4, datagram: &[u8]) {
        let (packet_id, body) = match split_header(datagram) {
            Ok(parts) => parts,
            Err(err) => {
                tracing::debug!(peer = %from, "datagram dropped: {}", err);
                return;
            }
        };

        if packet_id != CONTROL_PACKET_ID {
            self.handle_sequenced(from, packet_id, body);
            return;
        }

        for message in Messages::new(body) {
            match message {
                Ok(message) => {
                    if let Err(err) = self.handle_control(from, message) {
                        tracing::debug!(peer = %from, "control message ignored: {}", err);
                    }
                }
                Err(err) => tracing::debug!(peer = %from, "malformed datagram dropped: {}", err),
            }
        }
    }

    fn handle_control(&mut self, from: SocketAddrV4, message: Message) -> Result<()> {
        let now = Instant::now();
        let transport = self.transport.as_ref().ok_or(TransportError::NotOpen)?;

        let message = match message {
            Message::Ping { message, .. } => {
                push_ping(
                    &mut self.pending_pings,
                    self.config.max_pending_pings,
                    from,
                    message,
                );
                return Ok(());
            }
            Message::Contact { client_key } => {
                if let Some(existing) = self.sessions.get(&from) {
                    return Err(SessionError::WrongStage(existing.stage()).into());
                }
                let keypair = self
                    .host_keypair
                    .get_or_insert_with(KeyPair::random)
                    .clone();
                let mut session = Session::host(from, keypair, self.config.resend_interval());
                let challenge = session.on_contact(client_key, Timestamp::now())?;
                session.queue.send_control(transport, from, challenge, now);
                self.closing.remove(&from);
                self.sessions.insert(from, session);
                return Ok(());
            }
            Message::Ack(packet_id) => {
                if let Some(closing) = self.closing.get_mut(&from) {
                    if closing.queue.on_ack(packet_id) {
                        self.closing.remove(&from);
                        tracing::debug!(peer = %from, packet_id, "terminate acknowledged");
                    }
                    return Ok(());
                }
                Message::Ack(packet_id)
            }
            Message::Nak(packet_id) => {
                if let Some(closing) = self.closing.get_mut(&from) {
                    closing.queue.on_nak(transport, from, packet_id, now);
                    return Ok(());
                }
                Message::Nak(packet_id)
            }
            other => other,
        };

        let session = self.sessions.get_mut(&from).ok_or(SessionError::NoSession)?;
        match message {
            Message::Challenge {
                host_key,
                timestamp,
                ..
            } => {
                if let Some(login) = session.on_challenge(host_key, timestamp)? {
                    session.queue.send_control(transport, from, login, now);
                }
            }
            Message::IncompatibleChallenge { version } => {
                session.on_incompatible_challenge(version)?;
            }
            Message::Login { ciphertext } => session.on_login(&ciphertext)?,
            Message::Accept {
                avatar,
                encrypted_key,
            } => {
                if session.role() == Role::Client && session.is_established() {
                    tracing::debug!(peer = %from, "duplicate accept, acknowledging again");
                } else {
                    session.on_accept(avatar, &encrypted_key)?;
                }
                send_clear(transport, from, &[Message::Ack(CONTROL_PACKET_ID)])?;
            }
            Message::Terminate { reason, .. } => {
                // Once both sides hold the key a terminate travels sequenced
                if session.peer_has_data_key() {
                    tracing::debug!(peer = %from, "clear terminate for established session ignored");
                } else {
                    session.on_terminate(&reason);
                }
            }
            Message::Ack(packet_id) => {
                session.queue.on_ack(packet_id);
            }
            Message::Nak(packet_id) => {
                session.queue.on_nak(transport, from, packet_id, now);
            }
            Message::Command(command) => {
                tracing::debug!(peer = %from, id = command.id(), "command outside sequenced datagram dropped");
            }
            Message::Contact { .. } | Message::Ping { .. } => {}
        }
        Ok(())
    }

    fn handle_sequenced(&mut self, from: SocketAddrV4, packet_id: u32, body: &[u8]) {
        let now = Instant::now();
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&from) else {
            tracing::debug!(peer = %from, packet_id, "sequenced datagram without session dropped");
            return;
        };

        if session.stage().is_terminating() {
            // Likely a resend of the terminate whose ack was lost
            if let Err(err) = send_clear(transport, from, &[Message::Ack(packet_id)]) {
                tracing::warn!(peer = %from, "feedback not sent: {}", err);
            }
            return;
        }

        let mut body = body.to_vec();
        if let Err(err) = session.open_sequenced(packet_id, &mut body) {
            // Not acknowledged: the peer resends once we are established
            tracing::debug!(peer = %from, packet_id, "sequenced datagram dropped: {}", err);
            return;
        }

        // A terminate does not wait behind a gap; its sender resends only the terminate
        if packet_id > session.inbound.next_expected() {
            let reason = Messages::new(&body).find_map(|m| match m {
                Ok(Message::Terminate { reason, .. }) => Some(reason),
                _ => None,
            });
            if let Some(reason) = reason {
                if let Err(err) = send_clear(transport, from, &[Message::Ack(packet_id)]) {
                    tracing::warn!(peer = %from, "feedback not sent: {}", err);
                }
                session.on_terminate(&reason);
                return;
            }
        }

        let delivery = session.inbound.accept(packet_id, body);

        let mut feedback = Vec::with_capacity(1 + delivery.naks.len());
        if delivery.ack {
            feedback.push(Message::Ack(packet_id));
        }
        feedback.extend(delivery.naks.iter().map(|&id| Message::Nak(id)));
        if !feedback.is_empty() {
            if let Err(err) = send_clear(transport, from, &feedback) {
                tracing::warn!(peer = %from, "feedback not sent: {}", err);
            }
        }

        for (id, payload) in delivery.ready {
            tracing::trace!(peer = %from, packet_id = id, "datagram released in order");
            for message in Messages::new(&payload) {
                match message {
                    Ok(Message::Command(command)) => {
                        if let Some(handler) = self.command_handler.as_mut() {
                            dispatch(handler.as_mut(), from, &command);
                        }
                    }
                    Ok(Message::Terminate { reason, .. }) => {
                        session.on_terminate(&reason);
                        return;
                    }
                    Ok(Message::Ping { message, .. }) => push_ping(
                        &mut self.pending_pings,
                        self.config.max_pending_pings,
                        from,
                        message,
                    ),
                    Ok(Message::Ack(acked)) => {
                        session.queue.on_ack(acked);
                    }
                    Ok(Message::Nak(naked)) => {
                        session.queue.on_nak(transport, from, naked, now);
                    }
                    Ok(other) => {
                        tracing::debug!(peer = %from, "unexpected sequenced message ignored: {:?}", other);
                    }
                    Err(err) => {
                        tracing::debug!(peer = %from, packet_id = id, "rest of datagram dropped: {}", err);
                    }
                }
            }
        }
    }
}

impl<T: Transport> std::fmt::Debug for NetworkContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkContext")
            .field("local_addr", &self.local_addr())
            .field("sessions", &self.sessions.len())
            .field("closing", &self.closing.len())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

fn send_clear<T: Transport>(transport: &T, to: SocketAddrV4, messages: &[Message]) -> Result<usize> {
    let datagram = Message::datagram(CONTROL_PACKET_ID, messages)?;
    Ok(transport.send_to(&datagram, to))
}

fn push_ping(
    queue: &mut VecDeque<(SocketAddrV4, String)>,
    limit: usize,
    from: SocketAddrV4,
    message: String,
) {
    if queue.len() >= limit {
        queue.pop_front();
        tracing::debug!(peer = %from, "ping queue full, oldest ping dropped");
    }
    queue.push_back((from, message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NodeKind;
    use std::cell::RefCell;
    use std::net::Ipv4Addr;
    use std::rc::Rc;
    use verse_transport::{MemoryNetwork, MemoryTransport};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        ConnectRequest(SessionId, String, String),
        Accept(SessionId, u32),
        Terminate(SessionId, String),
        Ping(SocketAddrV4, String),
        NodeCreate(u32),
        NodeDestroy(u32),
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<Event>>>);

    impl Recorder {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.0.borrow_mut())
        }
    }

    impl SessionHandler for Recorder {
        fn on_connect_request(&mut self, session: SessionId, name: &str, password: &str) {
            self.0.borrow_mut().push(Event::ConnectRequest(
                session,
                name.to_owned(),
                password.to_owned(),
            ));
        }
        fn on_accept(&mut self, session: SessionId, avatar: u32) {
            self.0.borrow_mut().push(Event::Accept(session, avatar));
        }
        fn on_terminate(&mut self, session: SessionId, reason: &str) {
            self.0
                .borrow_mut()
                .push(Event::Terminate(session, reason.to_owned()));
        }
        fn on_ping(&mut self, from: SocketAddrV4, message: &str) {
            self.0.borrow_mut().push(Event::Ping(from, message.to_owned()));
        }
    }

    impl CommandHandler for Recorder {
        fn on_node_create(&mut self, _: SessionId, node_id: u32, _: NodeKind, _: u32) {
            self.0.borrow_mut().push(Event::NodeCreate(node_id));
        }
        fn on_node_destroy(&mut self, _: SessionId, node_id: u32) {
            self.0.borrow_mut().push(Event::NodeDestroy(node_id));
        }
    }

    struct Pair {
        network: MemoryNetwork,
        host: NetworkContext<MemoryTransport>,
        client: NetworkContext<MemoryTransport>,
        host_events: Recorder,
        client_events: Recorder,
        client_addr: SocketAddrV4,
    }

    fn pair() -> Pair {
        let network = MemoryNetwork::new();
        let client_transport = network.endpoint(5000);
        let client_addr = client_transport.address();
        let mut host =
            NetworkContext::with_transport(ContextConfig::host(), network.endpoint(4950)).unwrap();
        let mut client =
            NetworkContext::with_transport(ContextConfig::default(), client_transport).unwrap();

        let host_events = Recorder::default();
        let client_events = Recorder::default();
        host.set_session_handler(Box::new(host_events.clone()));
        host.set_command_handler(Box::new(host_events.clone()));
        client.set_session_handler(Box::new(client_events.clone()));
        client.set_command_handler(Box::new(client_events.clone()));

        Pair {
            network,
            host,
            client,
            host_events,
            client_events,
            client_addr,
        }
    }

    impl Pair {
        fn pump(&mut self) {
            for _ in 0..4 {
                self.client.receive();
                self.client.update();
                self.host.receive();
                self.host.update();
            }
        }

        fn connect(&mut self) -> SessionId {
            let host_id = self.client.connect("127.0.0.1", "alice", "pw", None).unwrap();
            self.pump();
            self.host.accept(self.client_addr, 42).unwrap();
            self.pump();
            host_id
        }
    }

    #[test]
    fn test_handshake_over_memory_network() {
        let mut p = pair();
        let host_id = p.client.connect("127.0.0.1", "alice", "pw", None).unwrap();
        assert_eq!(host_id, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4950));
        assert_eq!(p.client.current(), Some(host_id));

        p.pump();
        assert_eq!(
            p.host_events.take(),
            vec![Event::ConnectRequest(
                p.client_addr,
                "alice".into(),
                "pw".into()
            )]
        );
        assert_eq!(
            p.host.session(p.client_addr).unwrap().stage(),
            ConnectStage::PendingDecision
        );

        p.host.accept(p.client_addr, 42).unwrap();
        p.pump();

        assert_eq!(p.client_events.take(), vec![Event::Accept(host_id, 42)]);
        let client_session = p.client.session(host_id).unwrap();
        let host_session = p.host.session(p.client_addr).unwrap();
        assert_eq!(client_session.stage(), ConnectStage::Connected);
        assert_eq!(host_session.stage(), ConnectStage::Connected);
        assert_eq!(client_session.data_key(), host_session.data_key());
        // ack(0) stopped the accept resends
        assert!(host_session.queue().control().is_none());
    }

    #[test]
    fn test_commands_flow_in_both_directions() {
        let mut p = pair();
        p.connect();

        p.client
            .send_commands(&[
                Command::NodeCreate {
                    node_id: 1,
                    kind: NodeKind::Object,
                    owner: 42,
                },
                Command::NodeDestroy { node_id: 1 },
            ])
            .unwrap();
        p.pump();
        assert_eq!(
            p.host_events.take(),
            vec![Event::NodeCreate(1), Event::NodeDestroy(1)]
        );

        p.host
            .send_commands_to(
                p.client_addr,
                &[Command::NodeCreate {
                    node_id: 7,
                    kind: NodeKind::Text,
                    owner: 0,
                }],
            )
            .unwrap();
        p.pump();
        assert_eq!(p.client_events.take(), vec![Event::NodeCreate(7)]);

        let host_id = p.client.current().unwrap();
        assert!(p.client.session(host_id).unwrap().queue().is_empty());
        assert!(p.host.session(p.client_addr).unwrap().queue().is_empty());
    }

    #[test]
    fn test_commands_need_established_session() {
        let mut p = pair();
        assert!(matches!(
            p.client.send_command(&Command::NodeSubscribe { node_id: 1 }),
            Err(Error::Session(SessionError::NoSession))
        ));
        p.client.connect("127.0.0.1", "a", "b", None).unwrap();
        assert!(matches!(
            p.client.send_command(&Command::NodeSubscribe { node_id: 1 }),
            Err(Error::Session(SessionError::NotConnected))
        ));
    }

    #[test]
    fn test_batching_respects_datagram_limit() {
        let mut p = pair();
        p.connect();
        let host_id = p.client.current().unwrap();
        let before = p.client.session(host_id).unwrap().next_out_packet_id();

        // 10 bytes each; 1396 bytes of room per datagram
        let commands: Vec<_> = (0..300)
            .map(|i| Command::NodeCreate {
                node_id: i,
                kind: NodeKind::Bitmap,
                owner: 1,
            })
            .collect();
        p.client.send_commands(&commands).unwrap();

        let after = p.client.session(host_id).unwrap().next_out_packet_id();
        assert_eq!(after - before, 3);

        p.pump();
        assert_eq!(p.host_events.take().len(), 300);
    }

    #[test]
    fn test_terminate_reaches_host_callback() {
        let mut p = pair();
        let host_id = p.connect();

        p.client.terminate(None, "user quit").unwrap();
        assert!(p.client.session(host_id).is_none());
        assert_eq!(p.client.current(), None);

        p.pump();
        assert_eq!(
            p.host_events.take(),
            vec![Event::Terminate(p.client_addr, "user quit".into())]
        );
        assert!(p.host.session(p.client_addr).is_none());
        // No local callback
        assert!(p.client_events.take().is_empty());
        assert_eq!(p.client.pending_terminations(), 0);
    }

    #[test]
    fn test_unacknowledged_terminate_is_abandoned() {
        let mut p = pair();
        p.connect();
        p.network.set_loss_rate(1.0, 1);

        let sent = p.network.sent();
        p.client.terminate(None, "bye").unwrap();
        assert_eq!(p.client.pending_terminations(), 1);

        let interval = p.client.config().resend_interval();
        let resends = p.client.config().terminate_resends;
        let mut now = Instant::now();
        for _ in 0..resends {
            now += interval;
            p.client.update_at(now);
            assert_eq!(p.client.pending_terminations(), 1);
        }
        now += interval;
        p.client.update_at(now);

        assert_eq!(p.client.pending_terminations(), 0);
        assert_eq!(p.network.sent(), sent + 1 + u64::from(resends));
    }

    #[test]
    fn test_host_denies_before_accept() {
        let mut p = pair();
        let host_id = p.client.connect("127.0.0.1", "mallory", "guess", None).unwrap();
        p.pump();
        p.host_events.take();

        p.host.terminate(Some(p.client_addr), "access denied").unwrap();
        p.pump();

        assert_eq!(
            p.client_events.take(),
            vec![Event::Terminate(host_id, "access denied".into())]
        );
        assert!(p.client.session(host_id).is_none());
    }

    #[test]
    fn test_terminate_without_session() {
        let mut p = pair();
        assert!(matches!(
            p.client.terminate(None, "x"),
            Err(Error::Session(SessionError::NoSession))
        ));
        let sent = p.network.sent();
        p.client
            .terminate(Some(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4950)), "x")
            .unwrap();
        assert_eq!(p.network.sent(), sent + 1);
    }

    #[test]
    fn test_ping_is_deferred_to_update() {
        let mut p = pair();
        p.client.send_ping("127.0.0.1", "hello").unwrap();

        p.host.receive();
        assert!(p.host_events.take().is_empty());
        p.host.update();
        assert_eq!(
            p.host_events.take(),
            vec![Event::Ping(p.client_addr, "hello".into())]
        );
    }

    #[test]
    fn test_ping_queue_is_bounded() {
        let mut p = pair();
        let mut config = ContextConfig::host();
        config.max_pending_pings = 2;
        p.host = NetworkContext::with_transport(config, p.network.endpoint(4950)).unwrap();
        p.host.set_session_handler(Box::new(p.host_events.clone()));

        for msg in ["1", "2", "3"] {
            p.client.send_ping("127.0.0.1", msg).unwrap();
        }
        p.host.receive();
        p.host.update();
        assert_eq!(
            p.host_events.take(),
            vec![
                Event::Ping(p.client_addr, "2".into()),
                Event::Ping(p.client_addr, "3".into())
            ]
        );
    }

    #[test]
    fn test_lost_challenge_is_resent() {
        let mut p = pair();
        // 0: contact, 1: challenge
        p.network.drop_indices([1]);
        p.client.connect("127.0.0.1", "alice", "pw", None).unwrap();
        p.pump();
        assert_eq!(
            p.host.session(p.client_addr).unwrap().stage(),
            ConnectStage::Contacted
        );

        let later = Instant::now() + Duration::from_secs(2);
        p.host.update_at(later);
        p.pump();
        assert_eq!(
            p.host.session(p.client_addr).unwrap().stage(),
            ConnectStage::PendingDecision
        );
    }

    #[test]
    fn test_unknown_address_fails() {
        let mut p = pair();
        assert!(matches!(
            p.client.connect("127.0.0.1:notaport", "a", "b", None),
            Err(Error::Transport(TransportError::Address { .. }))
        ));
        assert!(p.client.sessions().next().is_none());
    }

    #[test]
    fn test_malformed_datagrams_are_dropped() {
        let mut p = pair();
        let raw = p.network.endpoint(6000);
        raw.send_to(&[0, 0], SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4950));
        raw.send_to(&[0, 0, 0, 0, 0, 0, 1], SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4950));
        raw.send_to(&[0, 0, 0, 9, 1, 2, 3], SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4950));
        assert_eq!(p.host.receive(), 3);
        assert!(p.host.sessions().next().is_none());
    }

    #[test]
    fn test_open_is_idempotent() {
        let mut p = pair();
        let first = p.client.open(None).unwrap();
        let second = p.client.open(Some(1234)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_set_current_requires_session() {
        let mut p = pair();
        let other = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1);
        assert!(p.client.set_current(other).is_err());
        let id = p.client.connect("127.0.0.1", "a", "b", None).unwrap();
        p.client.set_current(id).unwrap();
    }
}
