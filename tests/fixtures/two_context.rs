//! Host and client contexts on one in-memory network
//!
//! The fixture drives both contexts on the test thread. [`pump`] exchanges
//! datagrams until the network settles; [`tick`] additionally advances a
//! virtual clock by one resend interval so lost datagrams are resent
//! without sleeping.
//!
//! # Example
//!
//! ```no_run
//! use verse_integration_tests::fixtures::TwoContextFixture;
//!
//! let mut fixture = TwoContextFixture::new();
//! let host = fixture.establish(42);
//! assert!(fixture.client.session(host).unwrap().is_established());
//! ```
//!
//! [`pump`]: TwoContextFixture::pump
//! [`tick`]: TwoContextFixture::tick

use crate::test_helpers::{Recorder, host_keypair, init_tracing};
use std::net::SocketAddrV4;
use std::time::Instant;
use verse_core::{ContextConfig, NetworkContext, SessionId};
use verse_transport::{MemoryNetwork, MemoryTransport};

/// Port the host endpoint listens on
pub const HOST_PORT: u16 = 4950;

/// Port of the client endpoint
pub const CLIENT_PORT: u16 = 5000;

const PUMP_ROUNDS: usize = 4;

/// A host and a client context over a shared [`MemoryNetwork`]
pub struct TwoContextFixture {
    /// The network both endpoints are attached to
    pub network: MemoryNetwork,
    /// Host side
    pub host: NetworkContext<MemoryTransport>,
    /// Client side
    pub client: NetworkContext<MemoryTransport>,
    /// Callbacks fired by the host
    pub host_events: Recorder,
    /// Callbacks fired by the client
    pub client_events: Recorder,
    /// Address of the host endpoint
    pub host_addr: SocketAddrV4,
    /// Address of the client endpoint
    pub client_addr: SocketAddrV4,
    clock: Instant,
}

impl TwoContextFixture {
    /// Fixture with default configurations
    pub fn new() -> Self {
        Self::with_configs(ContextConfig::host(), ContextConfig::default())
    }

    /// Fixture with explicit host and client configurations
    pub fn with_configs(host_config: ContextConfig, client_config: ContextConfig) -> Self {
        init_tracing();

        let network = MemoryNetwork::new();
        let host_transport = network.endpoint(HOST_PORT);
        let client_transport = network.endpoint(CLIENT_PORT);
        let host_addr = host_transport.address();
        let client_addr = client_transport.address();

        let mut host = NetworkContext::with_transport(host_config, host_transport)
            .expect("valid host config");
        let mut client = NetworkContext::with_transport(client_config, client_transport)
            .expect("valid client config");
        host.set_host_keypair(host_keypair());

        let host_events = Recorder::new();
        let client_events = Recorder::new();
        host.set_session_handler(Box::new(host_events.clone()));
        host.set_command_handler(Box::new(host_events.clone()));
        client.set_session_handler(Box::new(client_events.clone()));
        client.set_command_handler(Box::new(client_events.clone()));

        Self {
            network,
            host,
            client,
            host_events,
            client_events,
            host_addr,
            client_addr,
            clock: Instant::now(),
        }
    }

    /// Address string the client uses to reach the host
    pub fn host_name(&self) -> String {
        self.host_addr.to_string()
    }

    /// Current virtual clock reading
    pub fn now(&self) -> Instant {
        self.clock
    }

    /// Exchange datagrams and fire callbacks until the network settles
    pub fn pump(&mut self) {
        for _ in 0..PUMP_ROUNDS {
            self.client.receive();
            self.client.update_at(self.clock);
            self.host.receive();
            self.host.update_at(self.clock);
        }
    }

    /// Advance the virtual clock by one resend interval, then pump
    pub fn tick(&mut self) {
        let interval = self
            .host
            .config()
            .resend_interval()
            .max(self.client.config().resend_interval());
        self.clock += interval;
        self.pump();
    }

    /// Tick until `done` holds, at most `max_ticks` times.
    ///
    /// Returns whether `done` was reached.
    pub fn run_until(&mut self, max_ticks: usize, mut done: impl FnMut(&Self) -> bool) -> bool {
        self.pump();
        for _ in 0..max_ticks {
            if done(self) {
                return true;
            }
            self.tick();
        }
        done(self)
    }

    /// Client logs in as `alice` and the host sees the request
    pub fn connect(&mut self) -> SessionId {
        let host_name = self.host_name();
        let id = self
            .client
            .connect(&host_name, "alice", "secret", None)
            .expect("connect");
        self.pump();
        id
    }

    /// Full handshake ending with `avatar` accepted on both sides.
    ///
    /// Recorded events are cleared. Returns the client's session id.
    pub fn establish(&mut self, avatar: u32) -> SessionId {
        let id = self.connect();
        self.host
            .accept(self.client_addr, avatar)
            .expect("host accepts");
        self.pump();
        self.host_events.take();
        self.client_events.take();
        id
    }
}

impl Default for TwoContextFixture {
    fn default() -> Self {
        Self::new()
    }
}
