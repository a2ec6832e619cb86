//! Session-layer messages: handshake, accept, terminate, ping, ack/nak,
//! plus the scene-graph [`Command`]s they carry.

use crate::PROTOCOL_VERSION;
use crate::command::Command;
use crate::error::WireError;
use crate::wire::{
    CMD_ACCEPT, CMD_ACK, CMD_HANDSHAKE, CMD_NAK, CMD_PING, CMD_TERMINATE, MAX_PING_MESSAGE_LEN,
    MAX_REASON_LEN, Reader, Writer,
};
use std::net::{Ipv4Addr, SocketAddrV4};
use verse_crypto::{Block, PublicKey};
use verse_transport::Timestamp;

const STAGE_CONTACT: u8 = 0;
const STAGE_CHALLENGE: u8 = 1;
const STAGE_LOGIN: u8 = 2;

const ACCEPT_VARIANT: u8 = 0;

/// One decoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake stage 0: the client's login public key
    Contact {
        /// Client public key
        client_key: PublicKey,
    },
    /// Handshake stage 1: version, host clock and the host's public key
    Challenge {
        /// Host protocol version
        version: u8,
        /// Host clock when the challenge was built
        timestamp: Timestamp,
        /// Host public key
        host_key: PublicKey,
    },
    /// Handshake stage 1 from a host speaking another protocol version.
    ///
    /// Nothing after the version byte is decoded.
    IncompatibleChallenge {
        /// Host protocol version
        version: u8,
    },
    /// Handshake stage 2: credentials encrypted under the host key
    Login {
        /// Encrypted credential block
        ciphertext: Block,
    },
    /// Host accepted the login
    Accept {
        /// Avatar id assigned to the client
        avatar: u32,
        /// Data key encrypted under the client key
        encrypted_key: Block,
    },
    /// Session ends
    Terminate {
        /// Sender's next outgoing packet id when it terminated
        packet_id: u32,
        /// Free-form reason
        reason: String,
    },
    /// Connectionless ping
    Ping {
        /// Address the sender sent the ping to
        target: SocketAddrV4,
        /// Free-form message
        message: String,
    },
    /// Packet id received
    Ack(u32),
    /// Packet id missing, resend now
    Nak(u32),
    /// Scene-graph command
    Command(Command),
}

impl Message {
    /// Append this message to `w`.
    ///
    /// Reasons and ping messages longer than their field are truncated.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidValue`] for an incompatible challenge,
    /// which is only ever decoded, or any error from [`Command::encode`].
    pub fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        match self {
            Self::Contact { client_key } => {
                w.put_u8(CMD_HANDSHAKE);
                w.put_u8(STAGE_CONTACT);
                put_key(w, client_key);
            }
            Self::Challenge {
                version,
                timestamp,
                host_key,
            } => {
                w.put_u8(CMD_HANDSHAKE);
                w.put_u8(STAGE_CHALLENGE);
                w.put_u8(*version);
                w.put_u32(timestamp.seconds);
                w.put_u32(timestamp.fraction);
                put_key(w, host_key);
            }
            Self::IncompatibleChallenge { version } => {
                return Err(WireError::InvalidValue {
                    field: "challenge version",
                    value: u32::from(*version),
                });
            }
            Self::Login { ciphertext } => {
                w.put_u8(CMD_HANDSHAKE);
                w.put_u8(STAGE_LOGIN);
                w.put_block(ciphertext);
            }
            Self::Accept {
                avatar,
                encrypted_key,
            } => {
                w.put_u8(CMD_ACCEPT);
                w.put_u8(ACCEPT_VARIANT);
                w.put_u32(*avatar);
                w.put_block(encrypted_key);
            }
            Self::Terminate { packet_id, reason } => {
                w.put_u8(CMD_TERMINATE);
                w.put_u32(*packet_id);
                w.put_cstr(
                    crate::wire::truncate_str(reason, MAX_REASON_LEN),
                    MAX_REASON_LEN,
                )?;
            }
            Self::Ping { target, message } => {
                w.put_u8(CMD_PING);
                w.put_u32(u32::from(*target.ip()));
                w.put_u16(target.port());
                w.put_cstr(
                    crate::wire::truncate_str(message, MAX_PING_MESSAGE_LEN),
                    MAX_PING_MESSAGE_LEN,
                )?;
            }
            Self::Ack(packet_id) => {
                w.put_u8(CMD_ACK);
                w.put_u32(*packet_id);
            }
            Self::Nak(packet_id) => {
                w.put_u8(CMD_NAK);
                w.put_u32(*packet_id);
            }
            Self::Command(command) => command.encode(w)?,
        }
        Ok(())
    }

    /// Build a complete datagram holding `messages` under `packet_id`
    pub fn datagram(packet_id: u32, messages: &[Message]) -> Result<Vec<u8>, WireError> {
        let mut w = Writer::datagram(packet_id);
        for message in messages {
            message.encode(&mut w)?;
        }
        Ok(w.into_bytes())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let id = r.u8()?;
        match id {
            CMD_HANDSHAKE => match r.u8()? {
                STAGE_CONTACT => Ok(Self::Contact {
                    client_key: read_key(r)?,
                }),
                STAGE_CHALLENGE => {
                    let version = r.u8()?;
                    if version != PROTOCOL_VERSION {
                        return Ok(Self::IncompatibleChallenge { version });
                    }
                    let seconds = r.u32()?;
                    let fraction = r.u32()?;
                    Ok(Self::Challenge {
                        version,
                        timestamp: Timestamp { seconds, fraction },
                        host_key: read_key(r)?,
                    })
                }
                STAGE_LOGIN => Ok(Self::Login {
                    ciphertext: r.block()?,
                }),
                stage => Err(WireError::UnknownStage(stage)),
            },
            CMD_ACCEPT => match r.u8()? {
                ACCEPT_VARIANT => Ok(Self::Accept {
                    avatar: r.u32()?,
                    encrypted_key: r.block()?,
                }),
                variant => Err(WireError::UnsupportedVariant {
                    command: CMD_ACCEPT,
                    variant,
                }),
            },
            CMD_TERMINATE => Ok(Self::Terminate {
                packet_id: r.u32()?,
                reason: r.cstr(MAX_REASON_LEN)?,
            }),
            CMD_PING => {
                let ip = Ipv4Addr::from(r.u32()?);
                let port = r.u16()?;
                Ok(Self::Ping {
                    target: SocketAddrV4::new(ip, port),
                    message: r.cstr(MAX_PING_MESSAGE_LEN)?,
                })
            }
            CMD_ACK => Ok(Self::Ack(r.u32()?)),
            CMD_NAK => Ok(Self::Nak(r.u32()?)),
            _ => Command::decode(id, r).map(Self::Command),
        }
    }
}

fn put_key(w: &mut Writer, key: &PublicKey) {
    w.put_block(key.exponent());
    w.put_block(key.modulus());
}

fn read_key(r: &mut Reader<'_>) -> Result<PublicKey, WireError> {
    let exponent = r.block()?;
    let modulus = r.block()?;
    PublicKey::from_parts(exponent, modulus).map_err(|_| WireError::InvalidPublicKey)
}

/// Iterator over the messages batched in one datagram body.
///
/// Yields each message in order. The first error is yielded once and ends
/// the iteration, since nothing after a malformed or unknown command can
/// be located. An incompatible challenge also ends it.
#[derive(Debug, Clone)]
pub struct Messages<'a> {
    reader: Reader<'a>,
    done: bool,
}

impl<'a> Messages<'a> {
    /// Iterate over the commands in `body` (the datagram minus its packet id)
    #[must_use]
    pub fn new(body: &'a [u8]) -> Self {
        Self {
            reader: Reader::new(body),
            done: false,
        }
    }
}

impl Iterator for Messages<'_> {
    type Item = Result<Message, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.reader.is_empty() {
            return None;
        }
        let result = Message::decode(&mut self.reader);
        if matches!(result, Err(_) | Ok(Message::IncompatibleChallenge { .. })) {
            self.done = true;
        }
        Some(result)
    }
}

impl std::iter::FusedIterator for Messages<'_> {}
