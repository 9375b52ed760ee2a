//! Window group leaders.
//!
//! Each toplevel may name another window as its leader. Following those links
//! to a toplevel that leads itself gives the group the toplevel belongs to.
//! Resolution is lazy: writes only mark the cache stale, and a refresh
//! recomputes every toplevel at once.

use tracing::{debug, trace, warn};

use super::tree::{NodeId, WindowId};
use super::wm_tree::WmTree;
use crate::common::collections::HashSet;

impl<W> WmTree<W> {
    /// Sets the raw leader window of a toplevel. `None` means it leads itself.
    pub fn set_leader(&mut self, toplevel: NodeId, leader: Option<WindowId>) {
        if !self.is_toplevel(toplevel) {
            debug!(?toplevel, "leader set on a window that is not a toplevel, ignoring");
            return;
        }
        let node = &mut self.map_mut()[toplevel];
        if node.leader == leader {
            return;
        }
        trace!(id = %node.id, ?leader, "leader changed");
        node.leader = leader;
        self.leaders_stale = true;
    }

    /// Whether the cached group leaders may be out of date.
    pub fn leaders_stale(&self) -> bool { self.leaders_stale }

    /// Group leader of `toplevel` as of the last refresh.
    pub fn leader_of(&self, toplevel: NodeId) -> Option<NodeId> {
        self.get(toplevel).and_then(|n| n.leader_final)
    }

    /// Recomputes the group leader of every live toplevel.
    ///
    /// Returns false if some leader window is not known yet. The cache stays
    /// marked stale in that case, so a later refresh tries again.
    pub fn refresh_leaders(&mut self) -> bool {
        if !self.leaders_stale {
            return true;
        }
        let toplevels: Vec<NodeId> = self.stack().filter(|&n| !self[n].is_zombie).collect();
        for &toplevel in &toplevels {
            self.map_mut()[toplevel].leader_final = None;
        }
        let mut visited = HashSet::default();
        let mut resolved = true;
        for toplevel in toplevels {
            self.resolve_leader(toplevel, &mut visited, &mut resolved);
        }
        self.leaders_stale = !resolved;
        resolved
    }

    fn resolve_leader(&mut self, node: NodeId, visited: &mut HashSet<NodeId>, resolved: &mut bool) -> NodeId {
        if let Some(leader) = self[node].leader_final {
            return leader;
        }
        let id = self[node].id;
        if !visited.insert(node) {
            warn!(%id, "leader cycle");
            return node;
        }

        let next = match self[node].leader {
            None => None,
            Some(x) if x == id.x => None,
            Some(x) => match self.find(x).and_then(|n| self.toplevel_of(n)) {
                Some(toplevel) => Some(toplevel),
                None => {
                    warn!(%id, leader = x, "leader is not tracked yet");
                    *resolved = false;
                    None
                }
            },
        };
        let leader = match next {
            Some(next) if next != node => self.resolve_leader(next, visited, resolved),
            _ => node,
        };
        self.map_mut()[node].leader_final = Some(leader);
        leader
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;
    use crate::common::config::TreeSettings;

    fn tree_with_toplevels(xs: &[WindowId]) -> (WmTree, Vec<NodeId>) {
        let mut t = WmTree::new(1, &TreeSettings::default());
        let root = t.root();
        let nodes = xs
            .iter()
            .map(|&x| {
                let node = t.new_node(x);
                t.add_window(node);
                t.attach(node, root);
                node
            })
            .collect();
        (t, nodes)
    }

    #[test]
    fn toplevels_lead_themselves_by_default() {
        let (mut t, n) = tree_with_toplevels(&[2, 3]);
        assert!(t.leaders_stale());
        assert!(t.refresh_leaders());
        assert!(!t.leaders_stale());
        assert_eq!(Some(n[0]), t.leader_of(n[0]));
        assert_eq!(Some(n[1]), t.leader_of(n[1]));
    }

    #[test]
    fn chains_resolve_to_the_end() {
        let (mut t, n) = tree_with_toplevels(&[2, 3, 4]);
        t.set_leader(n[0], Some(3));
        t.set_leader(n[1], Some(4));
        t.set_leader(n[2], Some(4));
        assert!(t.refresh_leaders());
        for &node in &n {
            assert_eq!(Some(n[2]), t.leader_of(node));
        }
    }

    #[test]
    fn three_cycle_converges() {
        let (mut t, n) = tree_with_toplevels(&[2, 3, 4]);
        t.set_leader(n[0], Some(3));
        t.set_leader(n[1], Some(4));
        t.set_leader(n[2], Some(2));
        assert!(t.refresh_leaders());
        let leader = t.leader_of(n[0]);
        assert!(leader.is_some());
        for &node in &n {
            assert_eq!(leader, t.leader_of(node));
        }
    }

    #[test]
    fn leader_inside_another_toplevel_resolves_to_that_toplevel() {
        let (mut t, n) = tree_with_toplevels(&[2, 3]);
        let inner = t.new_node(10);
        t.add_window(inner);
        t.attach(inner, n[1]);
        t.set_leader(n[0], Some(10));
        assert!(t.refresh_leaders());
        assert_eq!(Some(n[1]), t.leader_of(n[0]));
    }

    #[test]
    fn unknown_leader_is_retried() {
        let (mut t, n) = tree_with_toplevels(&[2]);
        t.set_leader(n[0], Some(5));
        assert!(!t.refresh_leaders());
        assert!(t.leaders_stale());
        assert_eq!(Some(n[0]), t.leader_of(n[0]));

        let root = t.root();
        let n5 = t.new_node(5);
        t.add_window(n5);
        t.attach(n5, root);
        assert!(t.refresh_leaders());
        assert_eq!(Some(n5), t.leader_of(n[0]));
    }

    #[test]
    fn leader_on_a_non_toplevel_is_ignored() {
        let (mut t, n) = tree_with_toplevels(&[2]);
        t.refresh_leaders();
        let inner = t.new_node(10);
        t.add_window(inner);
        t.attach(inner, n[0]);
        t.set_leader(inner, Some(2));
        assert!(!t.leaders_stale());
        assert_eq!(None, t[inner].leader());
    }

    #[test]
    fn killed_leader_marks_cache_stale() {
        let (mut t, n) = tree_with_toplevels(&[2, 3]);
        t.set_leader(n[0], Some(3));
        t.refresh_leaders();
        assert_eq!(Some(n[1]), t.leader_of(n[0]));

        t.destroy(n[1]);
        assert!(t.leaders_stale());
        assert!(!t.refresh_leaders());
        assert_eq!(Some(n[0]), t.leader_of(n[0]));
    }
}
