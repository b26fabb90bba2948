//! Commit graph storage and ancestry queries.
//!
//! [`GraphStore`] keeps streamed commits in display order together with an id
//! lookup and the derived descendant edges. [`is_related`] answers whether a
//! commit is connected to the active one, memoizing answers in a
//! [`RelationCache`].

pub mod core;
pub mod relation;

pub use self::core::{CommitLookup, CommitNode, CommitRecord, GraphSnapshot, GraphStats, GraphStore};
pub use self::relation::{is_related, RelationCache};
