//! Session lifecycle callbacks.

use crate::session::SessionId;
use std::net::SocketAddrV4;

/// Application callbacks for session events.
///
/// All callbacks fire from [`NetworkContext::update`](crate::NetworkContext::update),
/// never from inside `receive`. Defaults do nothing.
pub trait SessionHandler {
    /// A client logged in and waits for a decision.
    ///
    /// Answer later with [`NetworkContext::accept`](crate::NetworkContext::accept)
    /// or [`NetworkContext::terminate`](crate::NetworkContext::terminate).
    fn on_connect_request(&mut self, _session: SessionId, _name: &str, _password: &str) {}

    /// The host accepted our login
    fn on_accept(&mut self, _session: SessionId, _avatar: u32) {}

    /// The session ended; it no longer exists when this runs
    fn on_terminate(&mut self, _session: SessionId, _reason: &str) {}

    /// A ping arrived from `from`
    fn on_ping(&mut self, _from: SocketAddrV4, _message: &str) {}
}
