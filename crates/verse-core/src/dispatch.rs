//! Command dispatch.
//!
//! Decoded commands reach the application through a [`CommandHandler`].
//! Each command family has a primary method and an alias method; exactly
//! one of the two runs per command. Every method has an empty default, so
//! a handler only implements what it cares about and everything else is
//! silently discarded.

use crate::command::{Command, NodeKind};
use crate::session::SessionId;

/// Application callbacks for scene-graph commands
pub trait CommandHandler {
    /// Node index subscription
    fn on_node_index_subscribe(&mut self, _session: SessionId, _mask: u32) {}

    /// Node created
    fn on_node_create(&mut self, _session: SessionId, _node_id: u32, _kind: NodeKind, _owner: u32) {
    }

    /// Node destroyed
    fn on_node_destroy(&mut self, _session: SessionId, _node_id: u32) {}

    /// Node subscription
    fn on_node_subscribe(&mut self, _session: SessionId, _node_id: u32) {}

    /// Node subscription dropped
    fn on_node_unsubscribe(&mut self, _session: SessionId, _node_id: u32) {}

    /// Tag group created
    fn on_tag_group_create(
        &mut self,
        _session: SessionId,
        _node_id: u32,
        _group_id: u16,
        _name: &str,
    ) {
    }

    /// Tag group destroyed
    fn on_tag_group_destroy(&mut self, _session: SessionId, _node_id: u32, _group_id: u16) {}
}

/// Invoke the method of `handler` matching `command`
pub fn dispatch(handler: &mut dyn CommandHandler, session: SessionId, command: &Command) {
    match command {
        Command::NodeIndexSubscribe { mask } => handler.on_node_index_subscribe(session, *mask),
        Command::NodeCreate {
            node_id,
            kind,
            owner,
        } => handler.on_node_create(session, *node_id, *kind, *owner),
        Command::NodeDestroy { node_id } => handler.on_node_destroy(session, *node_id),
        Command::NodeSubscribe { node_id } => handler.on_node_subscribe(session, *node_id),
        Command::NodeUnsubscribe { node_id } => handler.on_node_unsubscribe(session, *node_id),
        Command::TagGroupCreate {
            node_id,
            group_id,
            name,
        } => handler.on_tag_group_create(session, *node_id, *group_id, name),
        Command::TagGroupDestroy { node_id, group_id } => {
            handler.on_tag_group_destroy(session, *node_id, *group_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[derive(Default)]
    struct Calls(Vec<&'static str>);

    impl CommandHandler for Calls {
        fn on_node_create(&mut self, _: SessionId, _: u32, _: NodeKind, _: u32) {
            self.0.push("create");
        }
        fn on_node_destroy(&mut self, _: SessionId, _: u32) {
            self.0.push("destroy");
        }
        fn on_tag_group_destroy(&mut self, _: SessionId, _: u32, _: u16) {
            self.0.push("tag group destroy");
        }
    }

    fn session() -> SessionId {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1)
    }

    #[test]
    fn test_primary_and_alias() {
        let mut calls = Calls::default();
        dispatch(
            &mut calls,
            session(),
            &Command::NodeCreate {
                node_id: 1,
                kind: NodeKind::Text,
                owner: 0,
            },
        );
        dispatch(&mut calls, session(), &Command::NodeDestroy { node_id: 1 });
        assert_eq!(calls.0, vec!["create", "destroy"]);
    }

    #[test]
    fn test_unhandled_commands_are_discarded() {
        let mut calls = Calls::default();
        dispatch(&mut calls, session(), &Command::NodeSubscribe { node_id: 1 });
        dispatch(&mut calls, session(), &Command::NodeIndexSubscribe { mask: 0xFF });
        assert!(calls.0.is_empty());

        dispatch(
            &mut calls,
            session(),
            &Command::TagGroupDestroy {
                node_id: 1,
                group_id: 2,
            },
        );
        assert_eq!(calls.0, vec!["tag group destroy"]);
    }
}
