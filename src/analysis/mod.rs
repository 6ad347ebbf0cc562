pub mod dominator;
pub mod glob;
pub mod inbound;
pub mod path;
pub mod retained;

pub use dominator::{DominatorOptions, DominatorTree, LEAK_PRONE_PATTERNS};
pub use path::PathNode;
