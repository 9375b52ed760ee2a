//! Handlers for structure and property notifications.
//!
//! Events may concern windows we never heard of, or ones whose import is
//! still under way. Misses are expected and only logged.

use tracing::{debug, instrument, trace, warn};

use super::Wm;
use super::replay::InboundEvent;
use super::request::Transport;
use crate::model::WindowId;

impl<W: 'static> Wm<W> {
    #[instrument(level = "debug", skip(self, conn))]
    pub fn notify_created(&mut self, conn: &mut dyn Transport, window: WindowId, parent: WindowId) {
        self.record.on_event(&InboundEvent::Created { window, parent });
        if self.tree.find(window) == Some(self.tree.root()) {
            debug!("root window reported as created, ignoring");
            return;
        }
        if let Some(stale) = self.tree.find(window) {
            // The id was reused before we saw the old window go away.
            warn!(id = %self.tree[stale].id(), "window id already tracked, forgetting the old window");
            self.tree.forget(stale);
        }
        let Some(parent_node) = self.tree.find(parent) else {
            debug!("parent is not tracked, ignoring");
            return;
        };
        self.import_window(conn, window, parent_node);
    }

    #[instrument(level = "debug", skip(self))]
    pub fn notify_destroyed(&mut self, window: WindowId) {
        self.record.on_event(&InboundEvent::Destroyed { window });
        let Some(node) = self.tree.find(window) else {
            debug!("window is not tracked, ignoring");
            return;
        };
        if node == self.tree.root() {
            debug!("root window destroyed, ignoring");
            return;
        }
        self.tree.destroy(node);
    }

    #[instrument(level = "debug", skip(self, conn))]
    pub fn notify_reparented(
        &mut self,
        conn: &mut dyn Transport,
        window: WindowId,
        old_parent: WindowId,
        new_parent: WindowId,
    ) {
        self.record.on_event(&InboundEvent::Reparented { window, old_parent, new_parent });
        let node = self.tree.find(window);
        if node == Some(self.tree.root()) {
            debug!("root window cannot be reparented, ignoring");
            return;
        }
        let parent = self.tree.find(new_parent);
        match (node, parent) {
            (None, None) => debug!("neither window is tracked, ignoring"),
            (None, Some(parent)) => self.import_window(conn, window, parent),
            (Some(node), None) => {
                debug!("moved under an untracked window, losing track of it");
                self.tree.forget(node);
            }
            (Some(node), Some(parent)) if node.parent(self.tree.map()) == Some(parent) => {
                // Reparenting to the same parent still raises the window.
                self.tree.move_to_end(node, false);
            }
            (Some(node), Some(parent)) => {
                if parent.ancestors(self.tree.map()).any(|a| a == node) {
                    // Only possible if we missed events. Give up on the subtree.
                    warn!("reparented under its own descendant, forgetting it");
                    self.tree.forget(node);
                    return;
                }
                self.tree.detach(node);
                if self.tree[parent].tree_queried() {
                    self.tree.attach(node, parent);
                } else {
                    // The parent's child list is on its way and will claim
                    // the window.
                    trace!("new parent not queried yet, holding the window as an orphan");
                    self.park_orphan(node, parent);
                }
            }
        }
    }

    /// `sibling` is the window now directly below `window`, if any.
    #[instrument(level = "debug", skip(self))]
    pub fn notify_restacked_above(&mut self, window: WindowId, sibling: Option<WindowId>) {
        self.record.on_event(&InboundEvent::RestackedAbove { window, sibling });
        let Some(node) = self.tree.find(window) else {
            debug!("window is not tracked, ignoring");
            return;
        };
        if node == self.tree.root() {
            debug!("root window has no siblings, ignoring");
            return;
        }
        let Some(sibling) = sibling else {
            self.tree.move_to_end(node, true);
            return;
        };
        match self.tree.find(sibling) {
            Some(below) if below == node => debug!("restacked relative to itself, ignoring"),
            Some(below) if below.parent(self.tree.map()) == node.parent(self.tree.map()) => {
                self.tree.move_to_above(node, below)
            }
            _ => debug!(sibling, "sibling is not tracked next to the window, ignoring"),
        }
    }

    #[instrument(level = "trace", skip(self, conn))]
    pub fn notify_property_changed(&mut self, conn: &mut dyn Transport, window: WindowId, wm_state: bool) {
        self.record.on_event(&InboundEvent::PropertyChanged { window, wm_state });
        if !wm_state {
            return;
        }
        let Some(node) = self.tree.find(window) else {
            debug!("window is not tracked, ignoring");
            return;
        };
        if node == self.tree.root() {
            trace!("WM_STATE on the root window, ignoring");
            return;
        }
        let id = self.tree[node].id();
        self.query_wm_state(conn, id);
    }
}
