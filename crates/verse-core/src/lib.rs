//! # Verse Core
//!
//! Session layer of the Verse protocol: a client and a host establish an
//! encrypted, reliable link over UDP.
//!
//! This crate provides:
//! - The multi-stage login handshake and its stage machine
//! - A reliable outbound queue (packet ids, ack/nak, fixed-interval resend)
//! - In-order delivery of sequenced datagrams
//! - The wire codec and typed scene-graph command dispatch
//! - [`NetworkContext`], which owns the socket, sessions and handlers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      NetworkContext                             │
//! │   (socket, sessions by peer address, handlers, ping queue)      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Session                                 │
//! │   (handshake stage, keys, outbound queue, inbound order)        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                     Messages / Commands                         │
//! │   (packet id + batched commands, masked after the handshake)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Known gap
//!
//! Decrypted handshake payloads carry no integrity check; see
//! [`verse_crypto`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod command;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod message;
pub mod ordering;
pub mod queue;
pub mod session;
pub mod stage;
pub mod wire;

pub use command::{Command, NodeKind};
pub use config::ContextConfig;
pub use context::NetworkContext;
pub use dispatch::{CommandHandler, dispatch};
pub use error::{Error, Result, SessionError, WireError};
pub use handler::SessionHandler;
pub use message::{Message, Messages};
pub use ordering::InboundOrder;
pub use queue::{OutboundQueue, QueueStats};
pub use session::{Credentials, Session, SessionId};
pub use stage::{ConnectStage, Role};

/// Protocol version carried in the challenge, compared exactly
pub const PROTOCOL_VERSION: u8 = 1;
