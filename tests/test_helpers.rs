//! Test helpers shared by the integration and property tests

use std::cell::RefCell;
use std::net::SocketAddrV4;
use std::rc::Rc;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use verse_core::{CommandHandler, NodeKind, SessionHandler, SessionId};
use verse_crypto::KeyPair;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; silent otherwise.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Host keypair generated once and reused across tests
pub fn host_keypair() -> KeyPair {
    static KEYPAIR: OnceLock<KeyPair> = OnceLock::new();
    KEYPAIR.get_or_init(KeyPair::random).clone()
}

/// Client keypair generated once and reused across tests
pub fn client_keypair() -> KeyPair {
    static KEYPAIR: OnceLock<KeyPair> = OnceLock::new();
    KEYPAIR.get_or_init(KeyPair::random).clone()
}

/// Everything an application can observe through its handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `SessionHandler::on_connect_request`
    ConnectRequest(SessionId, String, String),
    /// `SessionHandler::on_accept`
    Accept(SessionId, u32),
    /// `SessionHandler::on_terminate`
    Terminate(SessionId, String),
    /// `SessionHandler::on_ping`
    Ping(SocketAddrV4, String),
    /// `CommandHandler::on_node_index_subscribe`
    NodeIndexSubscribe(u32),
    /// `CommandHandler::on_node_create`
    NodeCreate(u32, NodeKind, u32),
    /// `CommandHandler::on_node_destroy`
    NodeDestroy(u32),
    /// `CommandHandler::on_node_subscribe`
    NodeSubscribe(u32),
    /// `CommandHandler::on_node_unsubscribe`
    NodeUnsubscribe(u32),
    /// `CommandHandler::on_tag_group_create`
    TagGroupCreate(u32, u16, String),
    /// `CommandHandler::on_tag_group_destroy`
    TagGroupDestroy(u32, u16),
}

/// Handler recording every callback, shared between a context and the test
#[derive(Clone, Default)]
pub struct Recorder(Rc<RefCell<Vec<Event>>>);

impl Recorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    /// Number of events recorded so far
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }
}

impl SessionHandler for Recorder {
    fn on_connect_request(&mut self, session: SessionId, name: &str, password: &str) {
        self.push(Event::ConnectRequest(
            session,
            name.to_owned(),
            password.to_owned(),
        ));
    }

    fn on_accept(&mut self, session: SessionId, avatar: u32) {
        self.push(Event::Accept(session, avatar));
    }

    fn on_terminate(&mut self, session: SessionId, reason: &str) {
        self.push(Event::Terminate(session, reason.to_owned()));
    }

    fn on_ping(&mut self, from: SocketAddrV4, message: &str) {
        self.push(Event::Ping(from, message.to_owned()));
    }
}

impl CommandHandler for Recorder {
    fn on_node_index_subscribe(&mut self, _: SessionId, mask: u32) {
        self.push(Event::NodeIndexSubscribe(mask));
    }

    fn on_node_create(&mut self, _: SessionId, node_id: u32, kind: NodeKind, owner: u32) {
        self.push(Event::NodeCreate(node_id, kind, owner));
    }

    fn on_node_destroy(&mut self, _: SessionId, node_id: u32) {
        self.push(Event::NodeDestroy(node_id));
    }

    fn on_node_subscribe(&mut self, _: SessionId, node_id: u32) {
        self.push(Event::NodeSubscribe(node_id));
    }

    fn on_node_unsubscribe(&mut self, _: SessionId, node_id: u32) {
        self.push(Event::NodeUnsubscribe(node_id));
    }

    fn on_tag_group_create(&mut self, _: SessionId, node_id: u32, group_id: u16, name: &str) {
        self.push(Event::TagGroupCreate(node_id, group_id, name.to_owned()));
    }

    fn on_tag_group_destroy(&mut self, _: SessionId, node_id: u32, group_id: u16) {
        self.push(Event::TagGroupDestroy(node_id, group_id));
    }
}
