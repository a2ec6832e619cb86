//! Reliable outbound queue.
//!
//! Every sequenced datagram is retained, keyed by packet id, until the peer
//! acknowledges it. A retained datagram is resent unmodified when it has
//! gone unacknowledged for the resend interval, or immediately on a nak.
//! The interval is fixed; there is no backoff.
//!
//! Handshake messages travel with packet id 0 and are not sequenced, but
//! they still need resending until the peer moves on. The queue keeps one
//! such *control* entry, replaced whenever the handshake advances.
//!
//! ```text
//!           allocate_packet_id        on_ack(id)
//! next_id ----------------------> retained ---------> gone
//!                                   |   ^
//!                  on_nak / timer   |   |  resend (same id, same bytes)
//!                                   +---+
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};
use verse_transport::Transport;

use crate::wire::CONTROL_PACKET_ID;

/// First packet id a session allocates
pub const FIRST_PACKET_ID: u32 = 1;

/// One datagram waiting for its acknowledgement
#[derive(Debug, Clone)]
pub struct RetainedEntry {
    packet_id: u32,
    bytes: Vec<u8>,
    last_sent: Instant,
    sends: u32,
}

impl RetainedEntry {
    fn new(packet_id: u32, bytes: Vec<u8>, now: Instant) -> Self {
        Self {
            packet_id,
            bytes,
            last_sent: now,
            sends: 1,
        }
    }

    /// Packet id, 0 for the control entry
    #[must_use]
    pub fn packet_id(&self) -> u32 {
        self.packet_id
    }

    /// The datagram exactly as first sent
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of times the datagram went out
    #[must_use]
    pub fn sends(&self) -> u32 {
        self.sends
    }

    /// When the datagram last went out
    #[must_use]
    pub fn last_sent(&self) -> Instant {
        self.last_sent
    }
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Datagrams sent for the first time
    pub sent: u64,
    /// Datagrams sent again, by timer or nak
    pub resent: u64,
    /// Acknowledgements that removed an entry
    pub acked: u64,
    /// Naks that triggered a resend
    pub naked: u64,
}

/// Retained-until-acknowledged datagrams of one session
#[derive(Debug)]
pub struct OutboundQueue {
    next_packet_id: u32,
    retained: BTreeMap<u32, RetainedEntry>,
    control: Option<RetainedEntry>,
    resend_interval: Duration,
    stats: QueueStats,
}

impl OutboundQueue {
    /// Create an empty queue resending after `resend_interval`
    #[must_use]
    pub fn new(resend_interval: Duration) -> Self {
        Self {
            next_packet_id: FIRST_PACKET_ID,
            retained: BTreeMap::new(),
            control: None,
            resend_interval,
            stats: QueueStats::default(),
        }
    }

    /// The id the next sequenced datagram will get, without consuming it
    #[must_use]
    pub fn next_out_packet_id(&self) -> u32 {
        self.next_packet_id
    }

    /// Consume and return the next packet id.
    ///
    /// Ids are not expected to wrap within a session; if they do, 0 is
    /// skipped since it marks control datagrams.
    pub fn allocate_packet_id(&mut self) -> u32 {
        let id = self.next_packet_id;
        self.next_packet_id = match id.wrapping_add(1) {
            CONTROL_PACKET_ID => FIRST_PACKET_ID,
            next => next,
        };
        id
    }

    /// Retain `bytes` under `packet_id` and transmit them to `peer`
    pub fn send<T: Transport>(
        &mut self,
        transport: &T,
        peer: SocketAddrV4,
        packet_id: u32,
        bytes: Vec<u8>,
        now: Instant,
    ) -> usize {
        let sent = transport.send_to(&bytes, peer);
        tracing::trace!(peer = %peer, packet_id, len = bytes.len(), "sequenced datagram sent");
        self.retained
            .insert(packet_id, RetainedEntry::new(packet_id, bytes, now));
        self.stats.sent += 1;
        sent
    }

    /// Replace the control entry with `bytes` and transmit them to `peer`
    pub fn send_control<T: Transport>(
        &mut self,
        transport: &T,
        peer: SocketAddrV4,
        bytes: Vec<u8>,
        now: Instant,
    ) -> usize {
        let sent = transport.send_to(&bytes, peer);
        self.control = Some(RetainedEntry::new(CONTROL_PACKET_ID, bytes, now));
        self.stats.sent += 1;
        sent
    }

    /// Stop resending the control entry
    pub fn clear_control(&mut self) {
        self.control = None;
    }

    /// The control entry, if one is being resent
    #[must_use]
    pub fn control(&self) -> Option<&RetainedEntry> {
        self.control.as_ref()
    }

    /// Handle an acknowledgement.
    ///
    /// Packet id 0 acknowledges the control entry. Returns whether an entry
    /// was removed; duplicate and unknown ids are ignored.
    pub fn on_ack(&mut self, packet_id: u32) -> bool {
        let removed = if packet_id == CONTROL_PACKET_ID {
            self.control.take().is_some()
        } else {
            self.retained.remove(&packet_id).is_some()
        };
        if removed {
            self.stats.acked += 1;
        }
        removed
    }

    /// Handle a negative acknowledgement by resending `packet_id` now.
    ///
    /// Returns whether anything was resent.
    pub fn on_nak<T: Transport>(
        &mut self,
        transport: &T,
        peer: SocketAddrV4,
        packet_id: u32,
        now: Instant,
    ) -> bool {
        let Some(entry) = self.retained.get_mut(&packet_id) else {
            return false;
        };
        transport.send_to(&entry.bytes, peer);
        entry.last_sent = now;
        entry.sends += 1;
        self.stats.resent += 1;
        self.stats.naked += 1;
        tracing::debug!(peer = %peer, packet_id, "resent on nak");
        true
    }

    /// Resend every entry unacknowledged for at least the resend interval.
    ///
    /// Returns the number of datagrams resent.
    pub fn resend_due<T: Transport>(
        &mut self,
        transport: &T,
        peer: SocketAddrV4,
        now: Instant,
    ) -> usize {
        let interval = self.resend_interval;
        let mut resent = 0;
        for entry in self.control.iter_mut().chain(self.retained.values_mut()) {
            if now.saturating_duration_since(entry.last_sent) < interval {
                continue;
            }
            transport.send_to(&entry.bytes, peer);
            entry.last_sent = now;
            entry.sends += 1;
            resent += 1;
        }
        if resent > 0 {
            self.stats.resent += resent as u64;
            tracing::debug!(peer = %peer, resent, "resend timer fired");
        }
        resent
    }

    /// Sequenced entries still waiting for an ack (control entry excluded)
    #[must_use]
    pub fn len(&self) -> usize {
        self.retained.len()
    }

    /// True when no sequenced entry is waiting (control entry excluded)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    /// Retained entry for `packet_id`
    #[must_use]
    pub fn get(&self, packet_id: u32) -> Option<&RetainedEntry> {
        self.retained.get(&packet_id)
    }

    /// Keep only the entry for `packet_id`, dropping the control entry too
    pub fn retain_only(&mut self, packet_id: u32) {
        self.retained.retain(|&id, _| id == packet_id);
        self.control = None;
    }

    /// Drop every retained entry and the control entry
    pub fn clear(&mut self) {
        self.retained.clear();
        self.control = None;
    }

    /// Counters since creation
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Configured resend interval
    #[must_use]
    pub fn resend_interval(&self) -> Duration {
        self.resend_interval
    }
}
