use std::collections::HashMap;

/// Memoized relation answers for one active commit.
///
/// A cache is only meaningful for the active id it was filled against; when
/// the active commit changes a new cache is created instead of clearing this
/// one.
#[derive(Debug, Clone, Default)]
pub struct RelationCache {
    entries: HashMap<String, bool>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<bool> {
        self.entries.get(id).copied()
    }

    pub fn mark(&mut self, id: &str, related: bool) {
        self.entries.insert(id.to_owned(), related);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
