//! Scene-graph commands carried over an established session.
//!
//! Several wire commands double as their own inverse: a reserved value in
//! one field turns "create" into "destroy" or "subscribe" into
//! "unsubscribe". Decoding resolves that once into a distinct [`Command`]
//! variant, so callers never look at the reserved values themselves.

use crate::error::WireError;
use crate::wire::{
    CMD_NODE_CREATE, CMD_NODE_INDEX_SUBSCRIBE, CMD_NODE_SUBSCRIBE, CMD_TAG_GROUP_CREATE, Reader,
    Writer,
};

/// Owner value that turns a node create into a node destroy
pub const NODE_OWNER_DESTROY: u32 = u32::MAX;

/// Longest tag group name (16-byte field including the terminator)
pub const MAX_TAG_GROUP_NAME_LEN: usize = 15;

/// Kind of a scene-graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    /// Transform and links to other nodes
    Object = 0,
    /// Polygon geometry
    Geometry = 1,
    /// Shading graph
    Material = 2,
    /// Pixel data
    Bitmap = 3,
    /// Text buffers
    Text = 4,
    /// Animation curves
    Curve = 5,
    /// Audio streams
    Audio = 6,
}

impl TryFrom<u8> for NodeKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Object),
            1 => Ok(Self::Geometry),
            2 => Ok(Self::Material),
            3 => Ok(Self::Bitmap),
            4 => Ok(Self::Text),
            5 => Ok(Self::Curve),
            6 => Ok(Self::Audio),
            _ => Err(WireError::InvalidValue {
                field: "node kind",
                value: u32::from(value),
            }),
        }
    }
}

/// A decoded scene-graph command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Subscribe to creation of nodes whose kind bit is set in `mask`
    NodeIndexSubscribe {
        /// Bit `n` selects [`NodeKind`] with discriminant `n`
        mask: u32,
    },
    /// A node was created
    NodeCreate {
        /// Node id
        node_id: u32,
        /// Node kind
        kind: NodeKind,
        /// Avatar that owns the node
        owner: u32,
    },
    /// A node was destroyed (node create with the reserved owner)
    NodeDestroy {
        /// Node id
        node_id: u32,
    },
    /// Subscribe to a node's contents
    NodeSubscribe {
        /// Node id
        node_id: u32,
    },
    /// Drop a node subscription (node subscribe with a zero flag)
    NodeUnsubscribe {
        /// Node id
        node_id: u32,
    },
    /// A tag group was created
    TagGroupCreate {
        /// Node holding the group
        node_id: u32,
        /// Group id within the node
        group_id: u16,
        /// Group name, never empty
        name: String,
    },
    /// A tag group was destroyed (tag group create with an empty name)
    TagGroupDestroy {
        /// Node holding the group
        node_id: u32,
        /// Group id within the node
        group_id: u16,
    },
}

impl Command {
    /// Wire command id; aliases share the id of their primary command
    #[must_use]
    pub fn id(&self) -> u8 {
        match self {
            Self::NodeIndexSubscribe { .. } => CMD_NODE_INDEX_SUBSCRIBE,
            Self::NodeCreate { .. } | Self::NodeDestroy { .. } => CMD_NODE_CREATE,
            Self::NodeSubscribe { .. } | Self::NodeUnsubscribe { .. } => CMD_NODE_SUBSCRIBE,
            Self::TagGroupCreate { .. } | Self::TagGroupDestroy { .. } => CMD_TAG_GROUP_CREATE,
        }
    }

    /// True for the destroy/unsubscribe variants
    #[must_use]
    pub fn is_alias(&self) -> bool {
        matches!(
            self,
            Self::NodeDestroy { .. } | Self::NodeUnsubscribe { .. } | Self::TagGroupDestroy { .. }
        )
    }

    /// True if `id` has a command decoder
    #[must_use]
    pub fn is_known_id(id: u8) -> bool {
        matches!(
            id,
            CMD_NODE_INDEX_SUBSCRIBE | CMD_NODE_CREATE | CMD_NODE_SUBSCRIBE | CMD_TAG_GROUP_CREATE
        )
    }

    /// Append the command id and payload to `w`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidValue`] for a create whose fields would
    /// decode as the destroy alias, and [`WireError::StringTooLong`] for an
    /// oversized tag group name.
    pub fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        match self {
            Self::NodeIndexSubscribe { mask } => {
                w.put_u8(CMD_NODE_INDEX_SUBSCRIBE);
                w.put_u32(*mask);
            }
            Self::NodeCreate {
                node_id,
                kind,
                owner,
            } => {
                if *owner == NODE_OWNER_DESTROY {
                    return Err(WireError::InvalidValue {
                        field: "node owner",
                        value: *owner,
                    });
                }
                w.put_u8(CMD_NODE_CREATE);
                w.put_u32(*node_id);
                w.put_u8(*kind as u8);
                w.put_u32(*owner);
            }
            Self::NodeDestroy { node_id } => {
                w.put_u8(CMD_NODE_CREATE);
                w.put_u32(*node_id);
                w.put_u8(NodeKind::Object as u8);
                w.put_u32(NODE_OWNER_DESTROY);
            }
            Self::NodeSubscribe { node_id } | Self::NodeUnsubscribe { node_id } => {
                w.put_u8(CMD_NODE_SUBSCRIBE);
                w.put_u32(*node_id);
                w.put_u8(u8::from(!self.is_alias()));
            }
            Self::TagGroupCreate {
                node_id,
                group_id,
                name,
            } => {
                if name.is_empty() || name.starts_with('\0') {
                    return Err(WireError::InvalidValue {
                        field: "tag group name length",
                        value: 0,
                    });
                }
                if name.len() > MAX_TAG_GROUP_NAME_LEN {
                    return Err(WireError::StringTooLong(MAX_TAG_GROUP_NAME_LEN));
                }
                w.put_u8(CMD_TAG_GROUP_CREATE);
                w.put_u32(*node_id);
                w.put_u16(*group_id);
                w.put_cstr(name, MAX_TAG_GROUP_NAME_LEN)?;
            }
            Self::TagGroupDestroy { node_id, group_id } => {
                w.put_u8(CMD_TAG_GROUP_CREATE);
                w.put_u32(*node_id);
                w.put_u16(*group_id);
                w.put_cstr("", MAX_TAG_GROUP_NAME_LEN)?;
            }
        }
        Ok(())
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut w = Writer::new();
        self.encode(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Decode the payload of command `id`; the id byte is already consumed.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnknownCommand`] for ids without a decoder and
    /// [`WireError::ShortMessage`] when the payload is truncated.
    pub fn decode(id: u8, r: &mut Reader<'_>) -> Result<Self, WireError> {
        match id {
            CMD_NODE_INDEX_SUBSCRIBE => Ok(Self::NodeIndexSubscribe { mask: r.u32()? }),
            CMD_NODE_CREATE => {
                let node_id = r.u32()?;
                let kind = r.u8()?;
                let owner = r.u32()?;
                if owner == NODE_OWNER_DESTROY {
                    return Ok(Self::NodeDestroy { node_id });
                }
                Ok(Self::NodeCreate {
                    node_id,
                    kind: NodeKind::try_from(kind)?,
                    owner,
                })
            }
            CMD_NODE_SUBSCRIBE => {
                let node_id = r.u32()?;
                if r.u8()? == 0 {
                    Ok(Self::NodeUnsubscribe { node_id })
                } else {
                    Ok(Self::NodeSubscribe { node_id })
                }
            }
            CMD_TAG_GROUP_CREATE => {
                let node_id = r.u32()?;
                let group_id = r.u16()?;
                let name = r.cstr(MAX_TAG_GROUP_NAME_LEN)?;
                if name.is_empty() {
                    Ok(Self::TagGroupDestroy { node_id, group_id })
                } else {
                    Ok(Self::TagGroupCreate {
                        node_id,
                        group_id,
                        name,
                    })
                }
            }
            _ => Err(WireError::UnknownCommand(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Result<Command, WireError> {
        let mut r = Reader::new(bytes);
        let id = r.u8()?;
        Command::decode(id, &mut r)
    }

    #[test]
    fn test_node_create_layout() {
        let cmd = Command::NodeCreate {
            node_id: 0x0102_0304,
            kind: NodeKind::Material,
            owner: 42,
        };
        assert_eq!(
            cmd.to_bytes().unwrap(),
            vec![10, 1, 2, 3, 4, 2, 0, 0, 0, 42]
        );
        assert_eq!(decode_one(&cmd.to_bytes().unwrap()).unwrap(), cmd);
    }

    #[test]
    fn test_node_destroy_alias() {
        let bytes = Command::NodeDestroy { node_id: 9 }.to_bytes().unwrap();
        assert_eq!(bytes[0], CMD_NODE_CREATE);
        assert_eq!(&bytes[6..], &[0xFF; 4]);
        assert_eq!(decode_one(&bytes).unwrap(), Command::NodeDestroy { node_id: 9 });

        // Kind byte is not validated on the destroy alias
        let raw = [CMD_NODE_CREATE, 0, 0, 0, 9, 0xAB, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(decode_one(&raw).unwrap(), Command::NodeDestroy { node_id: 9 });
    }

    #[test]
    fn test_create_with_reserved_owner_is_rejected() {
        let cmd = Command::NodeCreate {
            node_id: 1,
            kind: NodeKind::Object,
            owner: NODE_OWNER_DESTROY,
        };
        assert!(matches!(
            cmd.to_bytes(),
            Err(WireError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_subscribe_alias() {
        let sub = Command::NodeSubscribe { node_id: 3 }.to_bytes().unwrap();
        let unsub = Command::NodeUnsubscribe { node_id: 3 }.to_bytes().unwrap();
        assert_eq!(sub, vec![11, 0, 0, 0, 3, 1]);
        assert_eq!(unsub, vec![11, 0, 0, 0, 3, 0]);
        assert!(decode_one(&unsub).unwrap().is_alias());
        assert!(!decode_one(&sub).unwrap().is_alias());

        // Any non-zero flag subscribes
        assert_eq!(
            decode_one(&[11, 0, 0, 0, 3, 7]).unwrap(),
            Command::NodeSubscribe { node_id: 3 }
        );
    }

    #[test]
    fn test_tag_group_alias() {
        let create = Command::TagGroupCreate {
            node_id: 5,
            group_id: 2,
            name: "surface".into(),
        };
        assert_eq!(decode_one(&create.to_bytes().unwrap()).unwrap(), create);

        let destroy = Command::TagGroupDestroy {
            node_id: 5,
            group_id: 2,
        };
        let bytes = destroy.to_bytes().unwrap();
        assert_eq!(bytes, vec![16, 0, 0, 0, 5, 0, 2, 0]);
        assert_eq!(decode_one(&bytes).unwrap(), destroy);
    }

    #[test]
    fn test_tag_group_name_limits() {
        let empty = Command::TagGroupCreate {
            node_id: 1,
            group_id: 1,
            name: String::new(),
        };
        assert!(empty.to_bytes().is_err());

        let long = Command::TagGroupCreate {
            node_id: 1,
            group_id: 1,
            name: "x".repeat(16),
        };
        assert_eq!(
            long.to_bytes(),
            Err(WireError::StringTooLong(MAX_TAG_GROUP_NAME_LEN))
        );
    }

    #[test]
    fn test_invalid_node_kind() {
        let raw = [CMD_NODE_CREATE, 0, 0, 0, 1, 99, 0, 0, 0, 1];
        assert!(matches!(
            decode_one(&raw),
            Err(WireError::InvalidValue { value: 99, .. })
        ));
    }

    #[test]
    fn test_short_and_unknown() {
        assert!(matches!(
            decode_one(&[CMD_NODE_CREATE, 0, 0]),
            Err(WireError::ShortMessage { .. })
        ));
        assert_eq!(decode_one(&[200]), Err(WireError::UnknownCommand(200)));
        assert!(!Command::is_known_id(12));
        assert!(Command::is_known_id(16));
    }
}
