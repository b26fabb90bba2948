pub mod cache;
pub mod engine;

pub use cache::RelationCache;
pub use engine::is_related;
