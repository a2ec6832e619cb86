//! In-memory datagram network for deterministic testing.
//!
//! Real networks drop packets. To exercise resend and ack/nak recovery
//! without depending on real network conditions, a [`MemoryNetwork`] hands
//! out [`MemoryTransport`] endpoints that exchange datagrams through shared
//! queues and apply a configurable loss model:
//!
//! | Fault            | Description                                       |
//! |------------------|---------------------------------------------------|
//! | Indexed drop     | Drop the datagrams whose global send index is in  |
//! |                  | a given set (a finite, reproducible loss pattern).|
//! | Random loss      | Drop each datagram with probability `loss_rate`,  |
//! |                  | from a seeded RNG.                                |
//!
//! Everything is single-threaded; endpoints share state through `Rc`.

use crate::transport::Transport;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct NetworkState {
    queues: HashMap<SocketAddrV4, VecDeque<(SocketAddrV4, Vec<u8>)>>,
    sent: u64,
    dropped: u64,
    drop_indices: HashSet<u64>,
    loss: Option<(f64, StdRng)>,
}

impl NetworkState {
    fn should_drop(&mut self, index: u64) -> bool {
        if self.drop_indices.remove(&index) {
            return true;
        }
        match &mut self.loss {
            Some((rate, rng)) => rng.gen_bool(*rate),
            None => false,
        }
    }
}

/// A shared in-memory datagram network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl MemoryNetwork {
    /// Create an empty, lossless network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint at `127.0.0.1:port`
    #[must_use]
    pub fn endpoint(&self, port: u16) -> MemoryTransport {
        let address = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        self.state
            .borrow_mut()
            .queues
            .entry(address)
            .or_default();
        MemoryTransport {
            network: self.clone(),
            address,
        }
    }

    /// Drop the datagrams with these global send indices (0-based)
    pub fn drop_indices<I: IntoIterator<Item = u64>>(&self, indices: I) {
        self.state.borrow_mut().drop_indices.extend(indices);
    }

    /// Drop each datagram with probability `rate`, reproducibly from `seed`
    pub fn set_loss_rate(&self, rate: f64, seed: u64) {
        let rate = rate.clamp(0.0, 1.0);
        self.state.borrow_mut().loss = Some((rate, StdRng::seed_from_u64(seed)));
    }

    /// Stop dropping datagrams
    pub fn clear_loss(&self) {
        let mut state = self.state.borrow_mut();
        state.loss = None;
        state.drop_indices.clear();
    }

    /// Total datagrams handed to the network, dropped ones included
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.state.borrow().sent
    }

    /// Datagrams the loss model discarded
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.state.borrow().dropped
    }

    /// Datagrams waiting in any endpoint's queue
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.borrow().queues.values().map(VecDeque::len).sum()
    }
}

/// One endpoint of a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    address: SocketAddrV4,
}

impl MemoryTransport {
    /// The address peers use to reach this endpoint
    #[must_use]
    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }
}

impl Transport for MemoryTransport {
    fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> usize {
        let mut state = self.network.state.borrow_mut();
        let index = state.sent;
        state.sent += 1;

        if state.should_drop(index) {
            state.dropped += 1;
            tracing::trace!(index, peer = %addr, "memory network dropped datagram");
            return buf.len();
        }

        // No listener: lost like any unroutable datagram
        if let Some(queue) = state.queues.get_mut(&addr) {
            queue.push_back((self.address, buf.to_vec()));
        }
        buf.len()
    }

    fn recv_from(&self, buf: &mut [u8]) -> Option<(usize, SocketAddrV4)> {
        let mut state = self.network.state.borrow_mut();
        let (from, data) = state.queues.get_mut(&self.address)?.pop_front()?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Some((len, from))
    }

    fn wait_for_incoming(&self, _timeout: Duration) -> Duration {
        Duration::ZERO
    }

    fn local_addr(&self) -> Option<SocketAddrV4> {
        Some(self.address)
    }
}
