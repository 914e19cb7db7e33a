//! Control-flow nodes: conditional branching, bounded loops and merges.

mod branch;
mod merge;
mod repeat;

pub use branch::IfNode;
pub use merge::{MergeNode, MergeStrategy};
pub use repeat::LoopNode;
