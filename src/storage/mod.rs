pub mod disk;
pub mod node;

pub use node::{Node, NodeKind, NodeRef};
