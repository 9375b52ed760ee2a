use std::fmt;
use std::ops::{Index, IndexMut};

use slotmap::SlotMap;

/// Raw X window id.
pub type WindowId = u32;

/// Identity of a window in the tree.
///
/// The X server recycles window ids, so the raw id alone cannot tell a live
/// window apart from a destroyed one that happened to have the same id. The
/// generation comes from the owning tree's counter when the node is created
/// and is never handed out twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TreeId {
    pub generation: u64,
    pub x: WindowId,
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}@{}", self.x, self.generation)
    }
}

slotmap::new_key_type! {
    /// Represents a node somewhere in the tree.
    ///
    /// Keys are generation checked, so a handle to a freed node never resolves
    /// to whatever node later reuses its slot.
    pub struct NodeId;
}

/// Map that holds the structure of the window forest.
///
/// The real root, the orphan root and any detached subtrees all live in the
/// same map, which makes moving branches between them cheap.
#[derive(Default)]
pub struct NodeMap {
    map: SlotMap<NodeId, Node>,
}

impl NodeMap {
    pub fn new() -> NodeMap { NodeMap { map: SlotMap::default() } }

    pub fn contains(&self, id: NodeId) -> bool { self.map.contains_key(id) }

    pub fn get(&self, id: NodeId) -> Option<&Node> { self.map.get(id) }

    pub(crate) fn insert(&mut self, node: Node) -> NodeId { self.map.insert(node) }

    /// Removes a node that has already been unlinked from its parent.
    #[track_caller]
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        debug_assert!(
            self.map.get(id).map(|n| n.parent.is_none()).unwrap_or(true),
            "removing a node that is still linked"
        );
        self.map.remove(id)
    }
}

impl Index<NodeId> for NodeMap {
    type Output = Node;

    #[track_caller]
    fn index(&self, index: NodeId) -> &Self::Output { &self.map[index] }
}

impl IndexMut<NodeId> for NodeMap {
    #[track_caller]
    fn index_mut(&mut self, index: NodeId) -> &mut Self::Output { &mut self.map[index] }
}

/// A window as seen from our side.
///
/// Children are kept in stacking order: the first child is the topmost one.
#[derive(PartialEq, Debug)]
pub struct Node {
    pub(crate) id: TreeId,

    parent: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    next_sibling: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,

    /// Only meaningful on a toplevel.
    pub(crate) client_window: Option<NodeId>,
    /// Raw leader window, only meaningful on a toplevel.
    pub(crate) leader: Option<WindowId>,
    /// Cached result of following `leader` transitively.
    pub(crate) leader_final: Option<NodeId>,

    pub(crate) has_wm_state: bool,
    pub(crate) is_zombie: bool,
    pub(crate) tree_queried: bool,
    pub(crate) receiving_events: bool,
}

impl Node {
    pub(crate) fn new(id: TreeId) -> Node {
        Node {
            id,
            parent: None,
            prev_sibling: None,
            next_sibling: None,
            first_child: None,
            last_child: None,
            client_window: None,
            leader: None,
            leader_final: None,
            has_wm_state: false,
            is_zombie: false,
            tree_queried: false,
            receiving_events: false,
        }
    }

    pub fn id(&self) -> TreeId { self.id }

    pub fn parent(&self) -> Option<NodeId> { self.parent }

    pub fn client_window(&self) -> Option<NodeId> { self.client_window }

    pub fn leader(&self) -> Option<WindowId> { self.leader }

    pub fn leader_final(&self) -> Option<NodeId> { self.leader_final }

    pub fn has_wm_state(&self) -> bool { self.has_wm_state }

    pub fn is_zombie(&self) -> bool { self.is_zombie }

    /// Whether a confirmed child list has been received for this window.
    pub fn tree_queried(&self) -> bool { self.tree_queried }

    /// Whether the server accepted our event subscription for this window.
    pub fn receiving_events(&self) -> bool { self.receiving_events }
}

impl NodeId {
    #[track_caller]
    pub fn parent(self, map: &NodeMap) -> Option<NodeId> {
        map.map.get(self).and_then(|n| n.parent)
    }

    /// Children from the topmost to the bottommost.
    #[track_caller]
    pub fn children(self, map: &NodeMap) -> impl Iterator<Item = NodeId> + '_ {
        ChildIterator {
            cur: map.map.get(self).and_then(|n| n.first_child),
            map,
        }
    }

    /// Pre-order walk of the subtree rooted at this node, including itself.
    #[track_caller]
    pub fn traverse_preorder(self, map: &NodeMap) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(self), move |node| node.next_preorder(map, self))
    }

    /// Returns the node after this one in a pre-order traversal of `subroot`.
    ///
    /// Descends into the first child if there is one, otherwise climbs to the
    /// nearest ancestor below `subroot` that has a next sibling. Never leaves
    /// the subtree rooted at `subroot`.
    pub fn next_preorder(self, map: &NodeMap, subroot: NodeId) -> Option<NodeId> {
        if let Some(child) = self.first_child(map) {
            return Some(child);
        }
        let mut node = self;
        while node != subroot {
            if let Some(sibling) = node.next_sibling(map) {
                return Some(sibling);
            }
            node = node.parent(map)?;
        }
        None
    }

    /// Returns an iterator over all ancestors of the current node, including itself.
    #[track_caller]
    pub fn ancestors(self, map: &NodeMap) -> impl Iterator<Item = NodeId> + '_ {
        let mut next = Some(self);
        std::iter::from_fn(move || {
            let node = next;
            next = node.and_then(|n| map.map.get(n).and_then(|nd| nd.parent));
            node
        })
    }

    /// The sibling directly above this one in stacking order.
    #[track_caller]
    pub fn prev_sibling(self, map: &NodeMap) -> Option<NodeId> {
        map.map.get(self).and_then(|n| n.prev_sibling)
    }

    /// The sibling directly below this one in stacking order.
    #[track_caller]
    pub fn next_sibling(self, map: &NodeMap) -> Option<NodeId> {
        map.map.get(self).and_then(|n| n.next_sibling)
    }

    #[track_caller]
    pub fn first_child(self, map: &NodeMap) -> Option<NodeId> {
        map.map.get(self).and_then(|n| n.first_child)
    }

    #[track_caller]
    pub fn last_child(self, map: &NodeMap) -> Option<NodeId> {
        map.map.get(self).and_then(|n| n.last_child)
    }

    #[track_caller]
    pub fn is_empty(self, map: &NodeMap) -> bool {
        map.map.get(self).map(|n| n.first_child.is_none()).unwrap_or(true)
    }
}

impl NodeId {
    /// Links this node in as the first (topmost) child of `parent`.
    #[track_caller]
    pub(crate) fn link_under_front(self, parent: NodeId, map: &mut NodeMap) {
        if self == parent {
            return;
        }
        if !map.contains(self) || !map.contains(parent) {
            return;
        }

        let next_child = {
            let parent_node = &mut map.map[parent];
            parent_node.last_child.get_or_insert(self);
            parent_node.first_child.replace(self)
        };

        map.map[self].parent = Some(parent);

        if let Some(next) = next_child {
            self.hlink_before(next, map);
        }
    }

    /// Links this node in as the last (bottommost) child of `parent`.
    #[track_caller]
    pub(crate) fn link_under_back(self, parent: NodeId, map: &mut NodeMap) {
        if self == parent {
            return;
        }
        if !map.contains(self) || !map.contains(parent) {
            return;
        }

        let prev_child = {
            let parent_node = &mut map.map[parent];
            parent_node.first_child.get_or_insert(self);
            parent_node.last_child.replace(self)
        };

        map.map[self].parent = Some(parent);

        if let Some(prev) = prev_child {
            self.hlink_after(prev, map);
        }
    }

    /// Links this node in directly above `next`, under the same parent.
    #[track_caller]
    pub(crate) fn link_before(self, next: NodeId, map: &mut NodeMap) {
        let parent = map.map.get(next).and_then(|n| n.parent);
        let parent = parent.expect("cannot make a sibling of a root node or invalid sibling");
        if let Some(self_node) = map.map.get_mut(self) {
            self_node.parent = Some(parent);
        } else {
            return;
        }
        if let Some(parent_node) = map.map.get_mut(parent) {
            debug_assert!(parent_node.first_child.is_some());
            if parent_node.first_child == Some(next) {
                parent_node.first_child.replace(self);
            }
        }
        self.hlink_before(next, map);
    }

    fn hlink_after(self, prev: NodeId, map: &mut NodeMap) {
        if self == prev {
            return;
        }
        if map.map.get(self).is_none() || map.map.get(prev).is_none() {
            return;
        }

        let self_node = &mut map.map[self];
        debug_assert_eq!(self_node.prev_sibling, None);
        self_node.prev_sibling.replace(prev);

        let next = map.map[prev].next_sibling.replace(self);
        if let Some(next) = next {
            if let Some(next_node) = map.map.get_mut(next) {
                next_node.prev_sibling.replace(self);
            }
            map.map[self].next_sibling.replace(next);
        }
    }

    fn hlink_before(self, next: NodeId, map: &mut NodeMap) {
        if self == next {
            return;
        }
        if map.map.get(self).is_none() || map.map.get(next).is_none() {
            return;
        }

        let self_node = &mut map.map[self];
        debug_assert_eq!(self_node.next_sibling, None);
        self_node.next_sibling.replace(next);

        let prev = map.map[next].prev_sibling.replace(self);
        if let Some(prev) = prev {
            if let Some(prev_node) = map.map.get_mut(prev) {
                prev_node.next_sibling.replace(self);
            }
            map.map[self].prev_sibling.replace(prev);
        }
    }
}

impl NodeMap {
    #[track_caller]
    pub(crate) fn unlink(&mut self, id: NodeId) {
        if let Some((prev_sibling, next_sibling, parent)) =
            self.map.get(id).map(|n| (n.prev_sibling, n.next_sibling, n.parent))
        {
            if let Some(prev) = prev_sibling {
                if let Some(prev_node) = self.map.get_mut(prev) {
                    prev_node.next_sibling = next_sibling;
                }
            }
            if let Some(next) = next_sibling {
                if let Some(next_node) = self.map.get_mut(next) {
                    next_node.prev_sibling = prev_sibling;
                }
            }
            if let Some(parent) = parent {
                if let Some(parent_node) = self.map.get_mut(parent) {
                    if parent_node.first_child == Some(id) {
                        parent_node.first_child = next_sibling;
                    }
                    if parent_node.last_child == Some(id) {
                        parent_node.last_child = prev_sibling;
                    }
                }
            }

            if let Some(node) = self.map.get_mut(id) {
                node.prev_sibling = None;
                node.next_sibling = None;
                node.parent = None;
            }
        }
    }
}

struct ChildIterator<'a> {
    cur: Option<NodeId>,
    map: &'a NodeMap,
}

impl<'a> Iterator for ChildIterator<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        self.cur = self.map.map.get(id).and_then(|n| n.next_sibling);
        Some(id)
    }
}
