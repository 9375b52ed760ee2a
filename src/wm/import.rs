//! Discovering windows and their subtrees.
//!
//! Importing a window takes three requests: a subscription to its events,
//! then its child list and its WM_STATE. The child list is what makes a node
//! trustworthy. Until it has arrived, children created on the server are not
//! added by hand, because the list would then contain them a second time.

use tracing::{debug, instrument, trace, warn};

use super::Wm;
use super::error::WmError;
use super::replay::InboundEvent;
use super::request::{Continuation, RequestKind, RequestToken, Transport};
use crate::model::{NodeId, TreeId, WindowId};

impl<W: 'static> Wm<W> {
    /// Starts importing the whole tree from the root down.
    pub fn import_root(&mut self, conn: &mut dyn Transport) {
        let root = self.tree[self.tree.root()].id().x;
        self.subscribe(conn, root, None);
    }

    pub fn reply_subscribe(&mut self, conn: &mut dyn Transport, token: RequestToken, ok: bool) -> Result<(), WmError> {
        let continuation = self.requests.take(token, RequestKind::Subscribe)?;
        self.record.on_event(&InboundEvent::Subscribed { token, ok });
        if let Continuation::Subscribe(on_reply) = continuation {
            on_reply(self, conn, ok);
        }
        Ok(())
    }

    pub fn reply_query_children(
        &mut self,
        conn: &mut dyn Transport,
        token: RequestToken,
        children: Option<Vec<WindowId>>,
    ) -> Result<(), WmError> {
        let continuation = self.requests.take(token, RequestKind::QueryChildren)?;
        self.record.on_event(&InboundEvent::Children { token, children: children.clone() });
        if let Continuation::QueryChildren(on_reply) = continuation {
            on_reply(self, conn, children);
        }
        Ok(())
    }

    pub fn reply_get_wm_state(
        &mut self,
        conn: &mut dyn Transport,
        token: RequestToken,
        value: Option<bool>,
    ) -> Result<(), WmError> {
        let continuation = self.requests.take(token, RequestKind::GetWmState)?;
        self.record.on_event(&InboundEvent::WmState { token, value });
        if let Continuation::GetWmState(on_reply) = continuation {
            on_reply(self, conn, value);
        }
        Ok(())
    }

    /// Starts tracking a window that showed up under `parent`.
    pub(super) fn import_window(&mut self, conn: &mut dyn Transport, window: WindowId, parent: NodeId) {
        let parent_id = self.tree[parent].id();
        if self.tree[parent].tree_queried() {
            let node = self.tree.new_node(window);
            self.tree.add_window(node);
            self.tree.attach(node, parent);
        } else {
            trace!(window, "parent not queried yet, its child list will bring the window in");
        }
        self.subscribe(conn, window, Some(parent_id));
    }

    pub(super) fn query_wm_state(&mut self, conn: &mut dyn Transport, id: TreeId) {
        let on_reply = Box::new(move |wm: &mut Wm<W>, _: &mut dyn Transport, value| wm.on_wm_state(id, value));
        self.requests.send(conn, id.x, Continuation::GetWmState(on_reply));
    }

    /// `parent` is the window `window` was last seen under, if any.
    fn subscribe(&mut self, conn: &mut dyn Transport, window: WindowId, parent: Option<TreeId>) {
        self.pending_imports += 1;
        let on_reply = Box::new(move |wm: &mut Wm<W>, conn: &mut dyn Transport, ok| {
            wm.on_subscribed(conn, window, parent, ok)
        });
        self.requests.send(conn, window, Continuation::Subscribe(on_reply));
    }

    fn finish_import(&mut self) {
        assert!(self.pending_imports > 0, "more imports finished than started");
        self.pending_imports -= 1;
    }

    #[instrument(level = "debug", skip(self, conn))]
    fn on_subscribed(&mut self, conn: &mut dyn Transport, window: WindowId, parent: Option<TreeId>, ok: bool) {
        if !ok {
            debug!("window went away before it could be subscribed to");
            self.finish_import();
            return;
        }
        let node = match self.tree.find(window) {
            Some(node) => node,
            None => {
                // Only a parent whose child list is still pending can claim
                // the window later. Otherwise it moved away unseen.
                let parent = parent.and_then(|id| self.tree.find_tree_id(id));
                let Some(parent) = parent.filter(|&p| !self.tree[p].tree_queried()) else {
                    debug!("window left its parent before the subscription went through, dropping it");
                    self.finish_import();
                    return;
                };
                // Whatever told us about the window raced with its parent's
                // child list. We know it exists but not where.
                debug!("subscribed to a window without a node, holding it as an orphan");
                let node = self.tree.new_node(window);
                self.tree.add_window(node);
                self.park_orphan(node, parent);
                node
            }
        };
        if self.tree[node].receiving_events() {
            trace!("already subscribed");
            self.finish_import();
            return;
        }
        self.tree.mark_receiving_events(node);

        let id = self.tree[node].id();
        let on_reply = Box::new(move |wm: &mut Wm<W>, conn: &mut dyn Transport, children| {
            wm.on_children(conn, id, children)
        });
        self.requests.send(conn, window, Continuation::QueryChildren(on_reply));
        if node != self.tree.root() {
            self.query_wm_state(conn, id);
        }
    }

    #[instrument(level = "debug", skip(self, conn, children))]
    fn on_children(&mut self, conn: &mut dyn Transport, id: TreeId, children: Option<Vec<WindowId>>) {
        self.finish_import();
        let Some(node) = self.tree.find_tree_id(id) else {
            debug!("window went away while its children were queried");
            return;
        };
        let Some(children) = children else {
            debug!("children query failed, window is being destroyed");
            if self.tree.is_orphan(node) {
                self.tree.forget(node);
            }
            return;
        };
        assert!(!self.tree[node].tree_queried(), "children of {id} received twice");
        self.tree.mark_tree_queried(node);

        // Bottom to top, so each attach lands on top of the previous one.
        for child in children {
            let Some(existing) = self.tree.find(child) else {
                self.import_window(conn, child, node);
                continue;
            };
            let parent = existing.parent(self.tree.map());
            if parent == Some(node) {
                trace!(child, "already a child");
                continue;
            }
            if node.ancestors(self.tree.map()).any(|a| a == existing) {
                warn!(child, "child list names an ancestor, ignoring it");
                continue;
            }
            if parent != Some(self.tree.orphan_root()) {
                debug!(child, "child was tracked under another parent, moving it");
            }
            if parent.is_some() {
                self.tree.detach(existing);
            }
            self.tree.attach(existing, node);
        }
        self.drop_unclaimed_orphans(id);
    }

    /// Holds `node` under the orphan root until the child list of `parent`
    /// claims it.
    pub(super) fn park_orphan(&mut self, node: NodeId, parent: NodeId) {
        let orphan_root = self.tree.orphan_root();
        self.tree.attach(node, orphan_root);
        self.orphan_parents.insert(node, self.tree[parent].id());
    }

    /// Forgets the orphans waiting for `parent` that its child list left out.
    fn drop_unclaimed_orphans(&mut self, parent: TreeId) {
        let tree = &self.tree;
        self.orphan_parents.retain(|&node, _| tree.is_orphan(node));
        let unclaimed: Vec<NodeId> = self
            .orphan_parents
            .iter()
            .filter(|&(_, &p)| p == parent)
            .map(|(&node, _)| node)
            .collect();
        for node in unclaimed {
            debug!(id = %self.tree[node].id(), "orphan missing from its parent's child list");
            self.orphan_parents.remove(&node);
            self.tree.forget(node);
        }
    }

    fn on_wm_state(&mut self, id: TreeId, value: Option<bool>) {
        let Some(node) = self.tree.find_tree_id(id) else {
            debug!(%id, "window went away before its WM_STATE arrived");
            return;
        };
        match value {
            Some(has_wm_state) => self.tree.set_wm_state(node, has_wm_state),
            None => debug!(%id, "WM_STATE query failed"),
        }
    }
}
