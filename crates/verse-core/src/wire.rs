//! Byte-level codec for Verse datagrams.
//!
//! A datagram is a 4-byte packet id followed by one or more commands packed
//! back to back:
//!
//! ```text
//! +-------------+-----+---------+-----+---------+-----
//! | packet id   | cmd | payload | cmd | payload | ...
//! | u32 (BE)    | u8  |         | u8  |         |
//! +-------------+-----+---------+-----+---------+-----
//! ```
//!
//! Packet id 0 marks an unsequenced control datagram sent in the clear.
//! Any other id is a sequenced datagram whose bytes after the packet id
//! are masked with the session's data key. All multi-byte fields are
//! big-endian; strings are zero-terminated with a per-field maximum.

use crate::error::WireError;
use verse_crypto::{BLOCK_SIZE, Block};

/// Size of the packet id prefix
pub const PACKET_ID_SIZE: usize = 4;

/// Packet id of unsequenced control datagrams
pub const CONTROL_PACKET_ID: u32 = 0;

/// Handshake (second byte is the stage)
pub const CMD_HANDSHAKE: u8 = 0;
/// Host accepts the login
pub const CMD_ACCEPT: u8 = 1;
/// Either side ends the session
pub const CMD_TERMINATE: u8 = 2;
/// Connectionless ping
pub const CMD_PING: u8 = 5;
/// Acknowledge a packet id
pub const CMD_ACK: u8 = 7;
/// Request immediate resend of a packet id
pub const CMD_NAK: u8 = 8;
/// Subscribe to the node index
pub const CMD_NODE_INDEX_SUBSCRIBE: u8 = 9;
/// Node create, or destroy with the reserved owner
pub const CMD_NODE_CREATE: u8 = 10;
/// Node subscribe, or unsubscribe with a zero flag
pub const CMD_NODE_SUBSCRIBE: u8 = 11;
/// Tag group create, or destroy with an empty name
pub const CMD_TAG_GROUP_CREATE: u8 = 16;

/// Longest termination reason, in bytes
pub const MAX_REASON_LEN: usize = 512;

/// Longest ping message, in bytes
pub const MAX_PING_MESSAGE_LEN: usize = 1400;

/// Split a datagram into its packet id and command bytes.
///
/// # Errors
///
/// Returns [`WireError::ShortMessage`] if the datagram cannot hold a packet
/// id and at least one command byte.
pub fn split_header(datagram: &[u8]) -> Result<(u32, &[u8]), WireError> {
    if datagram.len() <= PACKET_ID_SIZE {
        return Err(WireError::ShortMessage {
            expected: PACKET_ID_SIZE + 1,
            actual: datagram.len(),
        });
    }
    let (id, rest) = datagram.split_at(PACKET_ID_SIZE);
    Ok((u32::from_be_bytes([id[0], id[1], id[2], id[3]]), rest))
}

/// Truncate `value` to at most `max` bytes on a character boundary
#[must_use]
pub fn truncate_str(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Growable datagram writer
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Empty writer, for command bodies appended to a datagram later
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer that starts with a packet id header
    #[must_use]
    pub fn datagram(packet_id: u32) -> Self {
        let mut writer = Self {
            buf: Vec::with_capacity(256),
        };
        writer.put_u32(packet_id);
        writer
    }

    /// Append one byte
    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a big-endian u16
    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a big-endian u32
    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a key block verbatim
    pub fn put_block(&mut self, block: &Block) {
        self.buf.extend_from_slice(block);
    }

    /// Append raw bytes
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a zero-terminated string of at most `max` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::StringTooLong`] if `value` is longer than `max`.
    pub fn put_cstr(&mut self, value: &str, max: usize) -> Result<(), WireError> {
        if value.len() > max {
            return Err(WireError::StringTooLong(max));
        }
        // An interior NUL would end the string early on the peer
        let end = value.find('\0').unwrap_or(value.len());
        self.buf.extend_from_slice(&value.as_bytes()[..end]);
        self.buf.push(0);
        Ok(())
    }

    /// Bytes written so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish and return the encoded bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over received command bytes
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True once every byte has been consumed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::ShortMessage {
                expected: len,
                actual: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read one byte
    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian u16
    pub fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian u32
    pub fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a key block
    pub fn block(&mut self) -> Result<Block, WireError> {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(self.take(BLOCK_SIZE)?);
        Ok(block)
    }

    /// Read a zero-terminated string of at most `max` bytes.
    ///
    /// Invalid UTF-8 is replaced lossily.
    pub fn cstr(&mut self, max: usize) -> Result<String, WireError> {
        let rest = &self.data[self.pos..];
        let window = &rest[..rest.len().min(max + 1)];
        match window.iter().position(|&b| b == 0) {
            Some(end) => {
                let value = String::from_utf8_lossy(&window[..end]).into_owned();
                self.pos += end + 1;
                Ok(value)
            }
            None if window.len() > max => Err(WireError::StringTooLong(max)),
            None => Err(WireError::ShortMessage {
                expected: window.len() + 1,
                actual: window.len(),
            }),
        }
    }
}
