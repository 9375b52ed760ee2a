//! Queue of pending toplevel changes.
//!
//! The queue is not a log. Consumers only care about the net effect of
//! everything that happened since they last drained it, so new records are
//! folded into pending ones whenever that keeps the net effect intact.

use tracing::{trace, warn};

use super::tree::{NodeId, TreeId};

/// A change to the set of toplevels or to one of their client windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeChange {
    /// The client window of `toplevel` changed from `old` to `new`.
    ///
    /// `toplevel` may be a zombie by the time this is dequeued.
    Client {
        toplevel: NodeId,
        old: Option<TreeId>,
        new: Option<TreeId>,
    },
    /// A new toplevel appeared.
    ToplevelNew(NodeId),
    /// A toplevel went away. The handle is a zombie that the consumer must
    /// reap once it is done with it.
    ToplevelKilled(NodeId),
    /// The stacking order of toplevels changed.
    ToplevelRestacked,
}

/// A change together with the identity of the toplevel it concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeRecord {
    /// `None` only for [`TreeChange::ToplevelRestacked`].
    pub toplevel: Option<TreeId>,
    pub change: TreeChange,
}

impl ChangeRecord {
    pub fn client(toplevel_id: TreeId, toplevel: NodeId, old: Option<TreeId>, new: Option<TreeId>) -> Self {
        ChangeRecord {
            toplevel: Some(toplevel_id),
            change: TreeChange::Client { toplevel, old, new },
        }
    }

    pub fn toplevel_new(id: TreeId, node: NodeId) -> Self {
        ChangeRecord {
            toplevel: Some(id),
            change: TreeChange::ToplevelNew(node),
        }
    }

    pub fn toplevel_killed(id: TreeId, zombie: NodeId) -> Self {
        ChangeRecord {
            toplevel: Some(id),
            change: TreeChange::ToplevelKilled(zombie),
        }
    }

    pub fn restacked() -> Self {
        ChangeRecord {
            toplevel: None,
            change: TreeChange::ToplevelRestacked,
        }
    }
}

/// What [`ChangeQueue::push`] did with a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    Appended,
    /// Folded into a pending record for the same toplevel.
    Merged,
    /// Redundant with, or cancelled out by, what is already pending.
    Dropped,
    /// A kill cancelled the pending creation of the same toplevel. Nobody has
    /// seen the toplevel, so its zombie must be freed right away.
    Cancelled,
}

struct Slot {
    record: ChangeRecord,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked FIFO stored in a slab, with popped slots recycled through a
/// free list.
pub struct ChangeQueue {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl Default for ChangeQueue {
    fn default() -> Self { ChangeQueue::with_capacity(0) }
}

impl ChangeQueue {
    pub fn with_capacity(capacity: usize) -> ChangeQueue {
        ChangeQueue {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Number of slots ever allocated, including free ones.
    pub fn allocated(&self) -> usize { self.slots.len() }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeRecord> + '_ {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let slot = &self.slots[cur?];
            cur = slot.next;
            Some(&slot.record)
        })
    }

    /// Adds a record, coalescing it with pending ones.
    ///
    /// * A kill removes the pending creation of the same toplevel along with
    ///   everything recorded for it afterwards. Client changes recorded before
    ///   the creation are redirected to the zombie.
    /// * A client change is folded into the pending client change of the same
    ///   toplevel. If the two cancel out, both disappear.
    /// * A restack is dropped when any restack, creation or kill is already
    ///   pending, since each of those already implies a restack.
    pub fn push(&mut self, record: ChangeRecord) -> Enqueued {
        match record.change {
            TreeChange::ToplevelKilled(zombie) => {
                if self.fold_kill(record.toplevel, zombie) {
                    return Enqueued::Cancelled;
                }
            }
            TreeChange::Client { old, new, .. } => {
                if let Some(outcome) = self.fold_client(record.toplevel, old, new) {
                    return outcome;
                }
            }
            TreeChange::ToplevelRestacked => {
                let implied = self.iter().any(|pending| {
                    matches!(
                        pending.change,
                        TreeChange::ToplevelRestacked
                            | TreeChange::ToplevelNew(_)
                            | TreeChange::ToplevelKilled(_)
                    )
                });
                if implied {
                    trace!("restack already implied by a pending change");
                    return Enqueued::Dropped;
                }
            }
            TreeChange::ToplevelNew(_) => {}
        }
        self.append(record);
        Enqueued::Appended
    }

    /// Removes the oldest record.
    pub fn pop(&mut self) -> Option<ChangeRecord> {
        let head = self.head?;
        let record = self.slots[head].record;
        self.release(head);
        Some(record)
    }

    /// Returns true if the kill cancelled a pending creation.
    fn fold_kill(&mut self, toplevel: Option<TreeId>, zombie: NodeId) -> bool {
        let mut found = false;
        let mut cur = self.head;
        while let Some(i) = cur {
            cur = self.slots[i].next;
            if self.slots[i].record.toplevel != toplevel {
                continue;
            }
            match self.slots[i].record.change {
                TreeChange::ToplevelNew(_) => {
                    found = true;
                    self.release(i);
                }
                _ if found => self.release(i),
                TreeChange::Client { old, new, .. } => {
                    self.slots[i].record.change = TreeChange::Client { toplevel: zombie, old, new };
                }
                _ => {}
            }
        }
        found
    }

    fn fold_client(
        &mut self,
        toplevel: Option<TreeId>,
        old: Option<TreeId>,
        new: Option<TreeId>,
    ) -> Option<Enqueued> {
        let mut cur = self.head;
        while let Some(i) = cur {
            cur = self.slots[i].next;
            let pending = self.slots[i].record;
            if pending.toplevel != toplevel {
                continue;
            }
            let TreeChange::Client { toplevel: node, old: pending_old, new: pending_new } = pending.change
            else {
                continue;
            };
            if pending_new != old {
                warn!(
                    ?pending_new,
                    ?old,
                    "client change does not continue from the pending one"
                );
            }
            if pending_old == new {
                self.release(i);
                return Some(Enqueued::Dropped);
            }
            self.slots[i].record.change = TreeChange::Client { toplevel: node, old: pending_old, new };
            return Some(Enqueued::Merged);
        }
        None
    }

    fn append(&mut self, record: ChangeRecord) {
        let slot = Slot { record, prev: self.tail, next: None };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        match self.tail {
            Some(tail) => self.slots[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
    }

    fn release(&mut self, index: usize) {
        let Slot { prev, next, .. } = self.slots[index];
        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }
        self.slots[index].prev = None;
        self.slots[index].next = None;
        self.free.push(index);
        self.len -= 1;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use slotmap::SlotMap;
    use test_log::test;

    use super::*;

    fn ids() -> (SlotMap<NodeId, ()>, Vec<NodeId>) {
        let mut keys = SlotMap::with_key();
        let nodes = (0..4).map(|_| keys.insert(())).collect();
        (keys, nodes)
    }

    fn tid(x: u32, generation: u64) -> TreeId { TreeId { generation, x } }

    fn drain(queue: &mut ChangeQueue) -> Vec<ChangeRecord> {
        std::iter::from_fn(|| queue.pop()).collect()
    }

    #[test]
    fn fifo_order() {
        let (_keys, n) = ids();
        let mut q = ChangeQueue::default();
        assert_eq!(Enqueued::Appended, q.push(ChangeRecord::toplevel_new(tid(2, 1), n[0])));
        assert_eq!(Enqueued::Appended, q.push(ChangeRecord::toplevel_new(tid(3, 2), n[1])));
        assert_eq!(2, q.len());
        assert_eq!(
            vec![
                ChangeRecord::toplevel_new(tid(2, 1), n[0]),
                ChangeRecord::toplevel_new(tid(3, 2), n[1]),
            ],
            drain(&mut q)
        );
        assert!(q.is_empty());
        assert_eq!(None, q.pop());
    }

    #[test]
    fn client_chain_collapses_to_one_record() {
        let (_keys, n) = ids();
        let t = tid(2, 1);
        let (a, b, c) = (tid(10, 2), tid(11, 3), tid(12, 4));
        let mut q = ChangeQueue::default();
        assert_eq!(Enqueued::Appended, q.push(ChangeRecord::client(t, n[0], Some(a), Some(b))));
        assert_eq!(Enqueued::Merged, q.push(ChangeRecord::client(t, n[0], Some(b), Some(c))));
        assert_eq!(vec![ChangeRecord::client(t, n[0], Some(a), Some(c))], drain(&mut q));
    }

    #[test]
    fn client_chain_back_to_start_cancels() {
        let (_keys, n) = ids();
        let t = tid(2, 1);
        let (a, b, c) = (tid(10, 2), tid(11, 3), tid(12, 4));
        let mut q = ChangeQueue::default();
        q.push(ChangeRecord::client(t, n[0], Some(a), Some(b)));
        q.push(ChangeRecord::client(t, n[0], Some(b), Some(c)));
        assert_eq!(Enqueued::Dropped, q.push(ChangeRecord::client(t, n[0], Some(c), Some(a))));
        assert!(q.is_empty());
    }

    #[test]
    fn client_changes_of_different_toplevels_stay_apart() {
        let (_keys, n) = ids();
        let mut q = ChangeQueue::default();
        q.push(ChangeRecord::client(tid(2, 1), n[0], None, Some(tid(10, 5))));
        q.push(ChangeRecord::client(tid(3, 2), n[1], None, Some(tid(11, 6))));
        assert_eq!(2, q.len());
    }

    #[test]
    fn same_window_new_generation_is_a_different_toplevel() {
        let (_keys, n) = ids();
        let mut q = ChangeQueue::default();
        q.push(ChangeRecord::toplevel_new(tid(2, 1), n[0]));
        assert_eq!(Enqueued::Appended, q.push(ChangeRecord::toplevel_killed(tid(2, 7), n[1])));
        assert_eq!(2, q.len());
    }

    #[test]
    fn kill_cancels_pending_creation() {
        let (_keys, n) = ids();
        let t = tid(5, 3);
        let mut q = ChangeQueue::default();
        q.push(ChangeRecord::toplevel_new(t, n[0]));
        q.push(ChangeRecord::client(t, n[0], None, Some(tid(6, 4))));
        assert_eq!(Enqueued::Cancelled, q.push(ChangeRecord::toplevel_killed(t, n[0])));
        assert!(q.is_empty());
    }

    #[test]
    fn kill_keeps_unrelated_records() {
        let (_keys, n) = ids();
        let mut q = ChangeQueue::default();
        q.push(ChangeRecord::toplevel_new(tid(2, 1), n[0]));
        q.push(ChangeRecord::toplevel_new(tid(5, 3), n[1]));
        q.push(ChangeRecord::toplevel_new(tid(3, 2), n[2]));
        q.push(ChangeRecord::toplevel_killed(tid(5, 3), n[1]));
        assert_eq!(
            vec![
                ChangeRecord::toplevel_new(tid(2, 1), n[0]),
                ChangeRecord::toplevel_new(tid(3, 2), n[2]),
            ],
            drain(&mut q)
        );
    }

    #[test]
    fn kill_redirects_earlier_client_change_to_zombie() {
        let (_keys, n) = ids();
        let t = tid(2, 1);
        let mut q = ChangeQueue::default();
        q.push(ChangeRecord::client(t, n[0], None, Some(tid(10, 4))));
        assert_eq!(Enqueued::Appended, q.push(ChangeRecord::toplevel_killed(t, n[3])));
        assert_eq!(
            vec![
                ChangeRecord::client(t, n[3], None, Some(tid(10, 4))),
                ChangeRecord::toplevel_killed(t, n[3]),
            ],
            drain(&mut q)
        );
    }

    #[test]
    fn restack_is_implied_by_pending_structure_changes() {
        let (_keys, n) = ids();
        let mut q = ChangeQueue::default();
        assert_eq!(Enqueued::Appended, q.push(ChangeRecord::restacked()));
        assert_eq!(Enqueued::Dropped, q.push(ChangeRecord::restacked()));
        drain(&mut q);

        q.push(ChangeRecord::toplevel_new(tid(2, 1), n[0]));
        assert_eq!(Enqueued::Dropped, q.push(ChangeRecord::restacked()));
        drain(&mut q);

        q.push(ChangeRecord::client(tid(2, 1), n[0], None, Some(tid(3, 2))));
        assert_eq!(Enqueued::Appended, q.push(ChangeRecord::restacked()));
    }

    #[test]
    fn slots_are_recycled() {
        let (_keys, n) = ids();
        let mut q = ChangeQueue::with_capacity(2);
        for round in 0..10 {
            q.push(ChangeRecord::toplevel_new(tid(2, round), n[0]));
            q.push(ChangeRecord::toplevel_new(tid(3, round), n[1]));
            assert_eq!(2, drain(&mut q).len());
        }
        assert_eq!(2, q.allocated());
    }

    #[test]
    fn removal_from_the_middle_keeps_links_intact() {
        let (_keys, n) = ids();
        let mut q = ChangeQueue::default();
        q.push(ChangeRecord::toplevel_new(tid(2, 1), n[0]));
        q.push(ChangeRecord::client(tid(3, 2), n[1], None, Some(tid(4, 3))));
        q.push(ChangeRecord::toplevel_new(tid(5, 4), n[2]));
        q.push(ChangeRecord::client(tid(3, 2), n[1], Some(tid(4, 3)), None));
        q.push(ChangeRecord::toplevel_new(tid(6, 5), n[3]));
        let order: Vec<_> = q.iter().map(|r| r.toplevel).collect();
        assert_eq!(vec![Some(tid(2, 1)), Some(tid(5, 4)), Some(tid(6, 5))], order);
        assert_eq!(3, drain(&mut q).len());
    }
}
