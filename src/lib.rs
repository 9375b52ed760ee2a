//! Mirror of the X11 window tree for a compositor.
//!
//! [`model::WmTree`] holds the tree itself and the queue of toplevel changes
//! derived from it. [`wm::Wm`] drives it from server events and replies, and
//! tracks window group leaders and focus on top.

pub mod common;
pub mod model;
pub mod wm;
