//! Keeps a [`WmTree`] in sync with the X server.
//!
//! [`Wm`] is fed server events as they arrive and replies to the requests it
//! made through a [`Transport`]. It never blocks: requests are fired off with
//! a continuation stored under their token, and each reply re-resolves the
//! window it is about, since the window may be long gone by then.

pub mod error;
mod events;
mod import;
pub mod replay;
pub mod request;

#[cfg(test)]
pub(crate) mod testing;

pub use error::WmError;
pub use replay::{InboundEvent, Record, replay};
pub use request::{CallbackTransport, Request, RequestKind, RequestToken, Transport};
use request::PendingRequests;
use tracing::{debug, trace};

use crate::common::collections::HashMap;
use crate::common::config::TreeSettings;
use crate::model::{NodeId, TreeChange, TreeId, WindowId, WmTree};

pub struct Wm<W = ()> {
    tree: WmTree<W>,
    settings: TreeSettings,
    requests: PendingRequests<W>,
    /// Windows between a subscribe request and their child list reply.
    pending_imports: usize,
    focused: Option<NodeId>,
    /// The parent each orphan is waiting for.
    orphan_parents: HashMap<NodeId, TreeId>,
    record: Record,
}

impl<W: 'static> Wm<W> {
    pub fn new(root: WindowId, settings: TreeSettings) -> Wm<W> {
        Wm {
            tree: WmTree::new(root, &settings),
            settings,
            requests: PendingRequests::new(),
            pending_imports: 0,
            focused: None,
            orphan_parents: HashMap::default(),
            record: Record::default(),
        }
    }

    /// Records every event fed to this `Wm` so it can be replayed later.
    pub fn with_record(mut self, mut record: Record) -> Wm<W> {
        let root = self.tree[self.tree.root()].id().x;
        record.start(root, &self.settings);
        self.record = record;
        self
    }

    pub fn tree(&self) -> &WmTree<W> { &self.tree }

    /// Direct access for setting payloads and draining changes.
    pub fn tree_mut(&mut self) -> &mut WmTree<W> { &mut self.tree }

    pub fn settings(&self) -> &TreeSettings { &self.settings }

    pub fn find(&self, window: WindowId) -> Option<NodeId> { self.tree.find(window) }

    pub fn dequeue_change(&mut self) -> Option<TreeChange> { self.tree.dequeue_change() }

    pub fn pending_imports(&self) -> usize { self.pending_imports }

    /// Number of requests still waiting for a reply.
    pub fn in_flight(&self) -> usize { self.requests.len() }

    /// Whether the tree has caught up with the server.
    ///
    /// Stacking order is only trustworthy once this holds, though nothing
    /// breaks if it is consulted earlier.
    pub fn is_consistent(&self) -> bool { self.pending_imports == 0 && !self.tree.has_orphans() }

    /// Frees a zombie handed out by a kill record.
    pub fn reap(&mut self, zombie: NodeId) {
        if self.focused == Some(zombie) {
            self.focused = None;
        }
        self.tree.reap(zombie);
    }

    pub fn set_focused(&mut self, node: Option<NodeId>) {
        if self.focused == node {
            return;
        }
        let id = |node: Option<NodeId>| node.and_then(|n| self.tree.get(n)).map(|n| n.id());
        debug!(from = ?id(self.focused), to = ?id(node), "focus changed");
        self.focused = node;
    }

    /// The focused toplevel, if it is still around.
    pub fn focused(&self) -> Option<NodeId> { self.focused.filter(|&n| self.tree.contains(n)) }

    pub fn set_leader(&mut self, toplevel: NodeId, leader: Option<WindowId>) {
        if self.settings.track_leader {
            self.tree.set_leader(toplevel, leader);
        }
    }

    /// Refreshes group leaders if anything changed since the last refresh.
    pub fn refresh_leaders(&mut self) -> bool {
        if !self.settings.track_leader {
            return true;
        }
        let resolved = self.tree.refresh_leaders();
        trace!(resolved, "leaders refreshed");
        resolved
    }

    pub fn leader_of(&self, toplevel: NodeId) -> Option<NodeId> {
        if !self.settings.track_leader {
            return self.tree.is_toplevel(toplevel).then_some(toplevel);
        }
        self.tree.leader_of(toplevel)
    }

    pub fn focused_leader(&self) -> Option<NodeId> { self.leader_of(self.focused()?) }

    /// Whether `toplevel` is in the same window group as the focused one.
    pub fn is_group_focused(&self, toplevel: NodeId) -> bool {
        match (self.focused_leader(), self.leader_of(toplevel)) {
            (Some(focused), Some(leader)) => focused == leader,
            _ => false,
        }
    }

    /// Dispatches an event or reply to the matching handler.
    pub fn handle_event(&mut self, conn: &mut dyn Transport, event: InboundEvent) -> Result<(), WmError> {
        match event {
            InboundEvent::Created { window, parent } => self.notify_created(conn, window, parent),
            InboundEvent::Destroyed { window } => self.notify_destroyed(window),
            InboundEvent::Reparented { window, old_parent, new_parent } => {
                self.notify_reparented(conn, window, old_parent, new_parent)
            }
            InboundEvent::RestackedAbove { window, sibling } => self.notify_restacked_above(window, sibling),
            InboundEvent::PropertyChanged { window, wm_state } => {
                self.notify_property_changed(conn, window, wm_state)
            }
            InboundEvent::Subscribed { token, ok } => return self.reply_subscribe(conn, token, ok),
            InboundEvent::Children { token, children } => {
                return self.reply_query_children(conn, token, children);
            }
            InboundEvent::WmState { token, value } => return self.reply_get_wm_state(conn, token, value),
        }
        Ok(())
    }
}
