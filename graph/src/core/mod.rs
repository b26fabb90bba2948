pub mod node;
pub mod store;

pub use node::{CommitNode, CommitRecord};
pub use store::{CommitLookup, GraphSnapshot, GraphStats, GraphStore};
