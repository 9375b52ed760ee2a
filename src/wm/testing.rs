use tracing::debug;

use super::request::{Request, RequestKind, Transport};
use super::{InboundEvent, Wm};
use crate::common::collections::{HashMap, HashSet, VecDeque};
use crate::model::WindowId;

#[derive(Clone, Debug, Default)]
struct FakeWindow {
    parent: Option<WindowId>,
    /// Bottom to top, the order the X server reports them in.
    children: Vec<WindowId>,
    wm_state: bool,
}

/// In-memory X server.
///
/// Mutations notify the `Wm` right away, but only when it is subscribed to
/// the affected parent, the way the real server would. Requests are queued
/// and answered from whatever the state is at the time they are answered.
pub struct FakeServer {
    root: WindowId,
    windows: HashMap<WindowId, FakeWindow>,
    subscribed: HashSet<WindowId>,
    requests: VecDeque<Request>,
}

impl Transport for FakeServer {
    fn send(&mut self, request: Request) { self.requests.push_back(request) }
}

impl FakeServer {
    pub fn new(root: WindowId) -> Self {
        let mut windows = HashMap::default();
        windows.insert(root, FakeWindow::default());
        FakeServer {
            root,
            windows,
            subscribed: HashSet::default(),
            requests: VecDeque::new(),
        }
    }

    pub fn requests(&self) -> impl Iterator<Item = &Request> + '_ { self.requests.iter() }

    /// Children of `window` from top to bottom.
    pub fn stack(&self, window: WindowId) -> Vec<WindowId> {
        self.windows[&window].children.iter().rev().copied().collect()
    }

    pub fn create(&mut self, wm: &mut Wm, window: WindowId, parent: WindowId) {
        assert!(!self.windows.contains_key(&window), "window {window} already exists");
        self.windows.insert(window, FakeWindow { parent: Some(parent), ..Default::default() });
        self.windows.get_mut(&parent).unwrap().children.push(window);
        if self.subscribed.contains(&parent) {
            wm.notify_created(self, window, parent);
        }
    }

    /// Creates a window on the server without anyone hearing about it.
    pub fn create_silently(&mut self, window: WindowId, parent: WindowId, wm_state: bool) {
        self.windows.insert(window, FakeWindow { parent: Some(parent), wm_state, ..Default::default() });
        self.windows.get_mut(&parent).unwrap().children.push(window);
    }

    /// Destroys a window along with its subtree, children first.
    pub fn destroy(&mut self, wm: &mut Wm, window: WindowId) {
        let children = self.windows[&window].children.clone();
        for child in children {
            self.destroy(wm, child);
        }
        let removed = self.windows.remove(&window).unwrap();
        self.subscribed.remove(&window);
        let parent = removed.parent.unwrap();
        self.windows.get_mut(&parent).unwrap().children.retain(|&w| w != window);
        if self.subscribed.contains(&parent) {
            wm.notify_destroyed(window);
        }
    }

    /// Moves a window to the top of `new_parent`.
    pub fn reparent(&mut self, wm: &mut Wm, window: WindowId, new_parent: WindowId) {
        let old_parent = self.windows[&window].parent.unwrap();
        self.windows.get_mut(&old_parent).unwrap().children.retain(|&w| w != window);
        self.windows.get_mut(&new_parent).unwrap().children.push(window);
        self.windows.get_mut(&window).unwrap().parent = Some(new_parent);
        if self.subscribed.contains(&old_parent) || self.subscribed.contains(&new_parent) {
            wm.notify_reparented(self, window, old_parent, new_parent);
        }
    }

    /// Raises a window to the top of its siblings.
    pub fn raise(&mut self, wm: &mut Wm, window: WindowId) {
        let parent = self.windows[&window].parent.unwrap();
        let siblings = &mut self.windows.get_mut(&parent).unwrap().children;
        siblings.retain(|&w| w != window);
        let below = siblings.last().copied();
        siblings.push(window);
        if self.subscribed.contains(&parent) {
            wm.notify_restacked_above(window, below);
        }
    }

    /// Lowers a window to the bottom of its siblings.
    pub fn lower(&mut self, wm: &mut Wm, window: WindowId) {
        let parent = self.windows[&window].parent.unwrap();
        let siblings = &mut self.windows.get_mut(&parent).unwrap().children;
        siblings.retain(|&w| w != window);
        siblings.insert(0, window);
        if self.subscribed.contains(&parent) {
            wm.notify_restacked_above(window, None);
        }
    }

    pub fn set_wm_state(&mut self, wm: &mut Wm, window: WindowId, wm_state: bool) {
        self.windows.get_mut(&window).unwrap().wm_state = wm_state;
        if self.subscribed.contains(&window) {
            wm.notify_property_changed(self, window, true);
        }
    }

    fn reply_for(&mut self, request: Request) -> InboundEvent {
        let Request { token, kind, window } = request;
        match kind {
            RequestKind::Subscribe => {
                let ok = self.windows.contains_key(&window);
                if ok {
                    self.subscribed.insert(window);
                }
                InboundEvent::Subscribed { token, ok }
            }
            RequestKind::QueryChildren => InboundEvent::Children {
                token,
                children: self.windows.get(&window).map(|w| w.children.clone()),
            },
            RequestKind::GetWmState => InboundEvent::WmState {
                token,
                value: self.windows.get(&window).map(|w| w.wm_state),
            },
        }
    }

    /// Answers the oldest request. Returns false if there was none.
    pub fn answer_one(&mut self, wm: &mut Wm) -> bool {
        let Some(request) = self.requests.pop_front() else {
            return false;
        };
        let reply = self.reply_for(request);
        debug!(?request, ?reply, "answering");
        wm.handle_event(self, reply).unwrap();
        true
    }

    /// Answers the oldest request about `window`, skipping ahead of requests
    /// about other windows.
    pub fn answer_for(&mut self, wm: &mut Wm, window: WindowId, kind: RequestKind) {
        let index = self
            .requests
            .iter()
            .position(|r| r.window == window && r.kind == kind)
            .unwrap_or_else(|| panic!("no pending {kind} request for {window}"));
        let request = self.requests.remove(index).unwrap();
        let reply = self.reply_for(request);
        wm.handle_event(self, reply).unwrap();
    }

    /// Answers requests until none are left, including the ones the answers
    /// cause.
    pub fn sync(&mut self, wm: &mut Wm) { while self.answer_one(wm) {} }

    /// Builds a `Wm` that has fully imported the current server state.
    pub fn imported_wm(&mut self) -> Wm {
        let mut wm = Wm::new(self.root, Default::default());
        wm.import_root(self);
        self.sync(&mut wm);
        wm
    }
}
