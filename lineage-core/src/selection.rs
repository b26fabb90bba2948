use crate::refs::Ref;
use graph::{GraphSnapshot, RelationCache};

/// The commit relation queries are answered against, with its memo table.
///
/// The cache belongs to one active id and one graph revision; changing either
/// swaps in a fresh cache.
#[derive(Debug, Clone)]
pub struct ActiveSelection {
    id: String,
    cache: RelationCache,
    /// Revision of the snapshot the cache was filled against
    revision: Option<u64>,
}

impl ActiveSelection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cache: RelationCache::new(),
            revision: None,
        }
    }

    /// Start from the commit HEAD pointed at when the refs were read
    pub fn from_refs(refs: &[Ref]) -> Option<Self> {
        refs.iter().find_map(|reference| match reference {
            Ref::Head(id) => Some(Self::new(id.clone())),
            _ => None,
        })
    }

    pub fn current(&self) -> &str {
        &self.id
    }

    pub fn set_active(&mut self, id: impl Into<String>) {
        let id = id.into();
        if id == self.id {
            return;
        }
        tracing::debug!(from = %self.id, to = %id, "active commit changed");
        *self = Self::new(id);
    }

    pub fn is_related(&mut self, graph: &GraphSnapshot, target_id: &str) -> bool {
        if self.revision != Some(graph.revision()) {
            self.cache = RelationCache::new();
            self.revision = Some(graph.revision());
        }
        graph::is_related(&self.id, &mut self.cache, graph, target_id)
    }

    pub fn cache(&self) -> &RelationCache {
        &self.cache
    }
}
