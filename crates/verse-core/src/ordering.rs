//! Inbound ordering of sequenced datagrams.
//!
//! Sequenced datagrams reach the application strictly in packet-id order.
//! One that arrives early waits in a map keyed by packet id until the gap
//! before it fills; the ids in that gap are naked once each so the sender
//! resends them without waiting for its timer.

use std::collections::{BTreeMap, BTreeSet};

use crate::queue::FIRST_PACKET_ID;

/// Furthest ahead of the next expected id a datagram may be buffered
pub const DEFAULT_REORDER_WINDOW: u32 = 1024;

/// What to do with one received sequenced datagram
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Acknowledge the packet id (false only for datagrams beyond the window)
    pub ack: bool,
    /// Payloads now deliverable, in packet-id order
    pub ready: Vec<(u32, Vec<u8>)>,
    /// Missing ids to nak
    pub naks: Vec<u32>,
}

/// Receive-side sequencing state of one session
#[derive(Debug)]
pub struct InboundOrder {
    next_expected: u32,
    pending: BTreeMap<u32, Vec<u8>>,
    naked: BTreeSet<u32>,
    window: u32,
}

impl Default for InboundOrder {
    fn default() -> Self {
        Self::new(DEFAULT_REORDER_WINDOW)
    }
}

impl InboundOrder {
    /// Expect packet id 1 first and buffer up to `window` ids ahead
    #[must_use]
    pub fn new(window: u32) -> Self {
        Self {
            next_expected: FIRST_PACKET_ID,
            pending: BTreeMap::new(),
            naked: BTreeSet::new(),
            window: window.max(1),
        }
    }

    /// Packet id the application receives next
    #[must_use]
    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    /// Number of datagrams buffered ahead of a gap
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed one decrypted datagram body.
    pub fn accept(&mut self, packet_id: u32, body: Vec<u8>) -> Delivery {
        let mut delivery = Delivery::default();

        if packet_id < self.next_expected {
            // Duplicate of something delivered; the ack may have been lost
            delivery.ack = true;
            return delivery;
        }
        if packet_id - self.next_expected >= self.window {
            tracing::debug!(
                packet_id,
                next_expected = self.next_expected,
                "datagram beyond reorder window dropped"
            );
            return delivery;
        }
        delivery.ack = true;

        if packet_id > self.next_expected {
            self.pending.entry(packet_id).or_insert(body);
            for missing in self.next_expected..packet_id {
                if !self.pending.contains_key(&missing) && self.naked.insert(missing) {
                    delivery.naks.push(missing);
                }
            }
            return delivery;
        }

        delivery.ready.push((packet_id, body));
        self.advance();
        while let Some(body) = self.pending.remove(&self.next_expected) {
            delivery.ready.push((self.next_expected, body));
            self.advance();
        }
        delivery
    }

    fn advance(&mut self) {
        self.naked.remove(&self.next_expected);
        self.next_expected = self.next_expected.wrapping_add(1);
    }
}
