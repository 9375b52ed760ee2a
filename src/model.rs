pub mod changes;
pub mod leader;
pub mod tree;
pub mod wm_tree;

pub use changes::{ChangeQueue, ChangeRecord, Enqueued, TreeChange};
pub use tree::{Node, NodeId, NodeMap, TreeId, WindowId};
pub use wm_tree::WmTree;
