//! Handshake stages and the transitions allowed between them.
//!
//! ```text
//! host:   Idle -> Contacted -> PendingHostCallback -> PendingDecision -> Connected
//! client: Contact -> Contacted -> PendingAccept -> PendingClientCallbackAccept -> Connected
//! either: any stage -> PendingClientCallbackTerminate
//! ```
//!
//! The callback stages park a session until the next `update` tick fires
//! the matching application callback. A session in
//! `PendingClientCallbackTerminate` is destroyed after its callback.

/// Which end of the handshake a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiated the connection
    Client,
    /// Answered a contact
    Host,
}

/// One discrete state of the connection handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectStage {
    /// Host: session created for a new contact, nothing sent yet
    Idle,
    /// Client: contact sent, waiting for the challenge
    Contact,
    /// Host: challenge sent, waiting for the login.
    /// Client: challenge received, login being built.
    Contacted,
    /// Client: login sent, waiting for the accept
    PendingAccept,
    /// Host: login decrypted, connect request callback due
    PendingHostCallback,
    /// Host: waiting for the application to call accept
    PendingDecision,
    /// Client: data key received, accept callback due
    PendingClientCallbackAccept,
    /// Either side: session ended, terminate callback due
    PendingClientCallbackTerminate,
    /// Handshake complete
    Connected,
}

impl ConnectStage {
    /// Stage a new session of `role` starts in
    #[must_use]
    pub fn initial(role: Role) -> Self {
        match role {
            Role::Client => Self::Contact,
            Role::Host => Self::Idle,
        }
    }

    /// Position along the handshake path, for ordering checks
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Idle | Self::Contact => 0,
            Self::Contacted => 1,
            Self::PendingAccept | Self::PendingHostCallback => 2,
            Self::PendingDecision | Self::PendingClientCallbackAccept => 3,
            Self::Connected => 4,
            Self::PendingClientCallbackTerminate => 5,
        }
    }

    /// Whether `self -> to` is an edge of the handshake graph of `role`
    #[must_use]
    pub fn can_transition(self, role: Role, to: Self) -> bool {
        use ConnectStage::*;

        match (role, self, to) {
            (_, PendingClientCallbackTerminate, _) => false,
            (_, _, PendingClientCallbackTerminate) => true,

            (Role::Host, Idle, Contacted)
            | (Role::Host, Contacted, PendingHostCallback)
            | (Role::Host, PendingHostCallback, PendingDecision)
            | (Role::Host, PendingDecision, Connected) => true,

            (Role::Client, Contact, Contacted)
            | (Role::Client, Contacted, PendingAccept)
            | (Role::Client, PendingAccept, PendingClientCallbackAccept)
            | (Role::Client, PendingClientCallbackAccept, Connected) => true,

            _ => false,
        }
    }

    /// True once sequenced, encrypted traffic may flow
    #[must_use]
    pub fn is_established(self) -> bool {
        matches!(self, Self::Connected | Self::PendingClientCallbackAccept)
    }

    /// True once the session is waiting only for its terminate callback
    #[must_use]
    pub fn is_terminating(self) -> bool {
        self == Self::PendingClientCallbackTerminate
    }
}
