//! The window tree and its mutation primitives.
//!
//! Every mutation keeps the parent and sibling links consistent and turns
//! whatever it did to the toplevels into records on the change queue.

use std::ops::Index;

use slotmap::SecondaryMap;
use tracing::{debug, trace, warn};

use super::changes::{ChangeQueue, ChangeRecord, Enqueued, TreeChange};
use super::tree::{Node, NodeId, NodeMap, TreeId, WindowId};
use crate::common::collections::HashMap;
use crate::common::config::TreeSettings;

/// Local copy of the server's window tree.
///
/// `W` is a payload attached to nodes by whoever renders them. The tree only
/// moves it around, most notably onto the zombie that replaces a toplevel.
pub struct WmTree<W = ()> {
    map: NodeMap,
    windows: HashMap<WindowId, NodeId>,
    payloads: SecondaryMap<NodeId, W>,
    root: NodeId,
    orphan_root: NodeId,
    generation: u64,
    changes: ChangeQueue,
    pub(super) leaders_stale: bool,
    warn_on_client_conflict: bool,
}

impl<W> Index<NodeId> for WmTree<W> {
    type Output = Node;

    #[track_caller]
    fn index(&self, index: NodeId) -> &Node { &self.map[index] }
}

impl<W> WmTree<W> {
    pub fn new(root: WindowId, settings: &TreeSettings) -> WmTree<W> {
        let mut map = NodeMap::new();
        // The orphan root is not a window, so it is never in the id table.
        let orphan_root = map.insert(Node::new(TreeId { generation: 0, x: 0 }));
        let mut tree = WmTree {
            map,
            windows: HashMap::default(),
            payloads: SecondaryMap::new(),
            root: orphan_root,
            orphan_root,
            generation: 1,
            changes: ChangeQueue::with_capacity(settings.queue_capacity()),
            leaders_stale: false,
            warn_on_client_conflict: settings.warn_on_client_conflict,
        };
        let root = tree.new_node(root);
        tree.add_window(root);
        tree.root = root;
        tree
    }

    pub fn root(&self) -> NodeId { self.root }

    pub fn orphan_root(&self) -> NodeId { self.orphan_root }

    pub fn map(&self) -> &NodeMap { &self.map }

    pub(super) fn map_mut(&mut self) -> &mut NodeMap { &mut self.map }

    pub fn contains(&self, node: NodeId) -> bool { self.map.contains(node) }

    pub fn get(&self, node: NodeId) -> Option<&Node> { self.map.get(node) }

    /// Current node for a window id.
    ///
    /// Ids are recycled by the server. A caller holding on to a window across
    /// an event boundary must compare the full [`TreeId`], or use
    /// [`WmTree::find_tree_id`].
    pub fn find(&self, window: WindowId) -> Option<NodeId> { self.windows.get(&window).copied() }

    /// Like [`WmTree::find`], but misses if the window has been recreated
    /// since `id` was taken.
    pub fn find_tree_id(&self, id: TreeId) -> Option<NodeId> {
        self.find(id.x).filter(|&node| self.map[node].id == id)
    }

    /// Creates a node that is neither attached nor findable yet.
    pub fn new_node(&mut self, window: WindowId) -> NodeId {
        let id = TreeId { generation: self.generation, x: window };
        self.generation += 1;
        self.map.insert(Node::new(id))
    }

    /// Makes `node` the one [`WmTree::find`] returns for its window id.
    #[track_caller]
    pub fn add_window(&mut self, node: NodeId) {
        let n = &self.map[node];
        assert!(!n.is_zombie, "zombie {} cannot be made findable", n.id);
        let previous = self.windows.insert(n.id.x, node);
        debug_assert!(
            previous.is_none_or(|prev| prev == node),
            "window {} added while another node holds its id",
            n.id
        );
    }

    pub fn is_toplevel(&self, node: NodeId) -> bool { node.parent(&self.map) == Some(self.root) }

    /// Whether `node` hangs directly off the orphan root.
    pub fn is_orphan(&self, node: NodeId) -> bool { node.parent(&self.map) == Some(self.orphan_root) }

    pub fn has_orphans(&self) -> bool { !self.orphan_root.is_empty(&self.map) }

    /// The toplevel `node` belongs to, which may be `node` itself.
    ///
    /// Returns `None` for the root and for anything that is not under it,
    /// such as orphans.
    pub fn toplevel_of(&self, node: NodeId) -> Option<NodeId> {
        let mut below = None;
        for ancestor in node.ancestors(&self.map) {
            if ancestor == self.root {
                return below;
            }
            below = Some(ancestor);
        }
        None
    }

    pub fn client_of(&self, toplevel: NodeId) -> Option<NodeId> {
        self.map.get(toplevel).and_then(|n| n.client_window)
    }

    /// The toplevel whose client window is `window`.
    pub fn find_by_client(&self, window: WindowId) -> Option<NodeId> {
        let node = self.find(window)?;
        let toplevel = self.toplevel_of(node)?;
        (self.map[toplevel].client_window == Some(node)).then_some(toplevel)
    }

    pub fn topmost_child_of(&self, node: NodeId) -> Option<NodeId> { node.first_child(&self.map) }

    pub fn bottommost_child_of(&self, node: NodeId) -> Option<NodeId> { node.last_child(&self.map) }

    /// The sibling stacked directly above `node`.
    pub fn above(&self, node: NodeId) -> Option<NodeId> { node.prev_sibling(&self.map) }

    /// The sibling stacked directly below `node`.
    pub fn below(&self, node: NodeId) -> Option<NodeId> { node.next_sibling(&self.map) }

    /// Toplevels from top to bottom, zombies included.
    pub fn stack(&self) -> impl Iterator<Item = NodeId> + '_ { self.root.children(&self.map) }

    pub fn dequeue_change(&mut self) -> Option<TreeChange> { self.changes.pop().map(|r| r.change) }

    pub fn has_changes(&self) -> bool { !self.changes.is_empty() }

    pub fn pending_changes(&self) -> impl Iterator<Item = &ChangeRecord> + '_ { self.changes.iter() }

    pub fn payload(&self, node: NodeId) -> Option<&W> { self.payloads.get(node) }

    pub fn payload_mut(&mut self, node: NodeId) -> Option<&mut W> { self.payloads.get_mut(node) }

    /// Attaches a payload, returning the one it replaces.
    pub fn set_payload(&mut self, node: NodeId, payload: W) -> Option<W> {
        self.payloads.insert(node, payload)
    }

    pub fn take_payload(&mut self, node: NodeId) -> Option<W> { self.payloads.remove(node) }

    pub(crate) fn mark_receiving_events(&mut self, node: NodeId) {
        self.map[node].receiving_events = true;
    }

    pub(crate) fn mark_tree_queried(&mut self, node: NodeId) { self.map[node].tree_queried = true; }

    /// Makes `node` the topmost child of `parent`.
    #[track_caller]
    pub fn attach(&mut self, node: NodeId, parent: NodeId) {
        let n = &self.map[node];
        assert!(
            n.parent().is_none() && node != self.root && node != self.orphan_root,
            "window {} is already attached",
            n.id
        );
        assert!(!self.map[parent].is_zombie, "zombie {} cannot gain children", self.map[parent].id);

        node.link_under_front(parent, &mut self.map);
        if parent == self.root {
            let client = self.find_client(node);
            self.map[node].client_window = client;
            self.leaders_stale = true;
            let id = self.map[node].id;
            self.enqueue(ChangeRecord::toplevel_new(id, node));
        } else if let Some(toplevel) = self.toplevel_of(parent) {
            self.refresh_client(toplevel);
        }
    }

    /// Removes `node` from its parent, keeping it and its subtree alive.
    ///
    /// A toplevel leaves a zombie in its place, which inherits the payload
    /// and is returned unless nobody has seen the toplevel yet.
    #[track_caller]
    pub fn detach(&mut self, node: NodeId) -> Option<NodeId> {
        let n = &self.map[node];
        let Some(parent) = n.parent() else {
            panic!("window {} is not attached", n.id);
        };

        if parent == self.root {
            let id = n.id;
            let mut zombie = Node::new(id);
            zombie.is_zombie = true;
            let zombie = self.map.insert(zombie);
            zombie.link_before(node, &mut self.map);
            self.map.unlink(node);
            if let Some(payload) = self.payloads.remove(node) {
                self.payloads.insert(zombie, payload);
            }
            let n = &mut self.map[node];
            n.client_window = None;
            n.leader_final = None;
            self.leaders_stale = true;
            return self.enqueue_killed(id, zombie);
        }

        let toplevel = self.toplevel_of(node);
        self.map.unlink(node);
        if let Some(toplevel) = toplevel {
            self.refresh_client(toplevel);
        }
        None
    }

    /// Handles the destruction of a window that has no children left.
    ///
    /// A toplevel turns into a zombie in place. Anything else is freed.
    #[track_caller]
    pub fn destroy(&mut self, node: NodeId) {
        let n = &self.map[node];
        let Some(parent) = n.parent() else {
            panic!("window {} is not attached", n.id);
        };
        if let Some(child) = node.first_child(&self.map) {
            panic!(
                "window {} destroyed while its child {} is still attached",
                n.id, self.map[child].id
            );
        }
        if n.has_wm_state {
            self.set_wm_state(node, false);
        }

        let id = self.map[node].id;
        if self.windows.get(&id.x) == Some(&node) {
            self.windows.remove(&id.x);
        }

        if parent == self.root {
            let n = &mut self.map[node];
            n.is_zombie = true;
            n.client_window = None;
            n.leader_final = None;
            self.leaders_stale = true;
            self.enqueue_killed(id, node);
        } else {
            self.map.unlink(node);
            self.free(node);
        }
    }

    /// Drops a whole subtree we can no longer keep track of.
    ///
    /// Used when a window moved somewhere we are not watching, or when its
    /// id turned out to have been reused behind our back.
    pub fn forget(&mut self, node: NodeId) {
        assert_ne!(node, self.root, "the root cannot be forgotten");
        debug!(id = %self.map[node].id, "forgetting subtree");
        if node.parent(&self.map).is_some() {
            self.detach(node);
        }
        let subtree: Vec<NodeId> = node.traverse_preorder(&self.map).collect();
        for n in subtree.into_iter().rev() {
            let id = self.map[n].id;
            if self.windows.get(&id.x) == Some(&n) {
                self.windows.remove(&id.x);
            }
            self.map.unlink(n);
            self.free(n);
        }
    }

    /// Frees a zombie once the consumer of its kill record is done with it.
    #[track_caller]
    pub fn reap(&mut self, zombie: NodeId) {
        let n = &self.map[zombie];
        assert!(n.is_zombie, "reaping {}, which is not a zombie", n.id);
        trace!(id = %n.id, "reaping zombie");
        self.map.unlink(zombie);
        self.free(zombie);
    }

    /// Restacks `node` directly above `sibling`.
    #[track_caller]
    pub fn move_to_above(&mut self, node: NodeId, sibling: NodeId) {
        let parent = node.parent(&self.map);
        assert!(parent.is_some(), "window {} is not attached", self.map[node].id);
        assert_eq!(
            parent,
            sibling.parent(&self.map),
            "{} restacked relative to a window with another parent",
            self.map[node].id
        );
        if node == sibling || node.next_sibling(&self.map) == Some(sibling) {
            return;
        }
        self.map.unlink(node);
        node.link_before(sibling, &mut self.map);
        if parent == Some(self.root) {
            self.enqueue(ChangeRecord::restacked());
        }
    }

    /// Restacks `node` to the bottom or top of its siblings.
    #[track_caller]
    pub fn move_to_end(&mut self, node: NodeId, to_bottom: bool) {
        let Some(parent) = node.parent(&self.map) else {
            panic!("window {} is not attached", self.map[node].id);
        };
        let end = if to_bottom {
            parent.last_child(&self.map)
        } else {
            parent.first_child(&self.map)
        };
        if end == Some(node) {
            return;
        }
        self.map.unlink(node);
        if to_bottom {
            node.link_under_back(parent, &mut self.map);
        } else {
            node.link_under_front(parent, &mut self.map);
        }
        if parent == self.root {
            self.enqueue(ChangeRecord::restacked());
        }
    }

    /// Records whether `node` carries window manager state.
    ///
    /// The first descendant of a toplevel to gain it becomes the client
    /// window. Later ones are ignored until the client loses it again.
    #[track_caller]
    pub fn set_wm_state(&mut self, node: NodeId, has_wm_state: bool) {
        assert_ne!(node, self.root, "the root window has no WM_STATE");
        let n = &mut self.map[node];
        let id = n.id;
        if n.has_wm_state == has_wm_state {
            debug!(%id, has_wm_state, "WM_STATE unchanged");
            return;
        }
        n.has_wm_state = has_wm_state;

        let Some(toplevel) = self.toplevel_of(node) else {
            trace!(%id, "not under the root, client is resolved when attached");
            return;
        };
        if toplevel == node {
            debug!(%id, "toplevel has WM_STATE itself, ignoring");
            return;
        }

        let current = self.map[toplevel].client_window;
        if !has_wm_state && current == Some(node) {
            let replacement = self.find_client(toplevel);
            self.set_client(toplevel, current, replacement);
        } else if has_wm_state && current.is_none() {
            self.set_client(toplevel, None, Some(node));
        } else if has_wm_state {
            let toplevel_id = self.map[toplevel].id;
            if self.warn_on_client_conflict {
                warn!(%id, toplevel = %toplevel_id, "toplevel already has a client window, ignoring");
            } else {
                debug!(%id, toplevel = %toplevel_id, "toplevel already has a client window, ignoring");
            }
        }
    }

    /// The first node in pre-order under `toplevel` that has WM_STATE.
    fn find_client(&self, toplevel: NodeId) -> Option<NodeId> {
        if self.map[toplevel].has_wm_state {
            debug!(id = %self.map[toplevel].id, "toplevel is its own client");
            return Some(toplevel);
        }
        toplevel.traverse_preorder(&self.map).find(|&n| self.map[n].has_wm_state)
    }

    fn refresh_client(&mut self, toplevel: NodeId) {
        let current = self.map[toplevel].client_window;
        let found = self.find_client(toplevel);
        if found != current {
            self.set_client(toplevel, current, found);
        }
    }

    fn set_client(&mut self, toplevel: NodeId, old: Option<NodeId>, new: Option<NodeId>) {
        self.map[toplevel].client_window = new;
        let old = old.and_then(|n| self.map.get(n)).map(|n| n.id);
        let new = new.map(|n| self.map[n].id);
        let toplevel_id = self.map[toplevel].id;
        self.enqueue(ChangeRecord::client(toplevel_id, toplevel, old, new));
    }

    fn enqueue(&mut self, record: ChangeRecord) -> Enqueued {
        let outcome = self.changes.push(record);
        trace!(?record, ?outcome, "enqueued change");
        outcome
    }

    fn enqueue_killed(&mut self, id: TreeId, zombie: NodeId) -> Option<NodeId> {
        match self.enqueue(ChangeRecord::toplevel_killed(id, zombie)) {
            Enqueued::Cancelled => {
                debug!(%id, "toplevel went away before anyone saw it");
                self.reap(zombie);
                None
            }
            _ => Some(zombie),
        }
    }

    fn free(&mut self, node: NodeId) {
        self.payloads.remove(node);
        self.map.remove(node);
    }
}
