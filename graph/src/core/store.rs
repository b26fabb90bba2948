use super::node::{CommitNode, CommitRecord};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of store revisions, shared by every store so that two different
/// graph states never carry the same revision.
static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

/// Read access to commit nodes by id
pub trait CommitLookup {
    fn node(&self, id: &str) -> Option<&CommitNode>;
}

impl CommitLookup for HashMap<String, CommitNode> {
    fn node(&self, id: &str) -> Option<&CommitNode> {
        self.get(id)
    }
}

/// Authoritative commit graph: display order plus id lookup
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    /// Commit IDs in backend display order
    order: Vec<String>,
    /// All nodes indexed by commit ID
    lookup: HashMap<String, CommitNode>,
    /// Edges to parents not registered yet: parent ID -> children IDs
    deferred: HashMap<String, Vec<String>>,
    revision: u64,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a commit at `slot` of the display order and register its edges.
    ///
    /// Slots past the end are appended. A commit that is already known keeps
    /// the descendants registered on it; its streamed fields are replaced.
    /// Edges pointing at parents that are not known yet are parked and
    /// attached once that parent arrives, so the descendant lists do not
    /// depend on arrival order.
    pub fn upsert_at(&mut self, slot: usize, record: CommitRecord) {
        let id = record.id.clone();
        let parent_ids = record.parent_ids.clone();

        match self.order.get_mut(slot) {
            Some(current) => *current = id.clone(),
            None => self.order.push(id.clone()),
        }

        match self.lookup.get_mut(&id) {
            Some(node) => node.refresh(record),
            None => {
                let descendants = self.deferred.remove(&id).unwrap_or_default();
                self.lookup
                    .insert(id.clone(), CommitNode::from_record(record, descendants));
            }
        }

        for parent_id in parent_ids {
            let children = match self.lookup.get_mut(&parent_id) {
                Some(parent) => &mut parent.descendant_ids,
                None => self.deferred.entry(parent_id).or_default(),
            };
            if !children.contains(&id) {
                children.push(id.clone());
            }
        }

        self.bump();
    }

    /// Shrink the display order to `len` commits and drop everything that is
    /// no longer part of it.
    pub fn truncate(&mut self, len: usize) {
        self.order.truncate(len);

        let live: HashSet<&str> = self.order.iter().map(String::as_str).collect();
        self.lookup.retain(|id, _| live.contains(id.as_str()));
        for node in self.lookup.values_mut() {
            node.descendant_ids.retain(|id| live.contains(id.as_str()));
        }
        self.deferred.retain(|_, children| {
            children.retain(|id| live.contains(id.as_str()));
            !children.is_empty()
        });

        self.bump();
    }

    fn bump(&mut self) {
        self.revision = NEXT_REVISION.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, commit_id: &str) -> Option<&CommitNode> {
        self.lookup.get(commit_id)
    }

    /// Nodes in display order
    pub fn iter(&self) -> impl Iterator<Item = &CommitNode> + '_ {
        self.order.iter().filter_map(|id| self.lookup.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Changes on every mutation; unique across stores, 0 for a new store
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            order: self.order.clone(),
            lookup: self.lookup.clone(),
            revision: self.revision,
        }
    }

    /// Get all root commits (no parents)
    pub fn roots(&self) -> Vec<&CommitNode> {
        self.iter().filter(|node| node.is_root()).collect()
    }

    /// Get all leaf commits (no registered children)
    pub fn leaves(&self) -> Vec<&CommitNode> {
        self.iter()
            .filter(|node| node.descendant_ids.is_empty())
            .collect()
    }

    /// Get statistics about the graph
    pub fn stats(&self) -> GraphStats {
        GraphStats::collect(self.iter())
    }
}

impl CommitLookup for GraphStore {
    fn node(&self, id: &str) -> Option<&CommitNode> {
        self.get(id)
    }
}

/// Immutable copy of the store handed to readers
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    order: Vec<String>,
    lookup: HashMap<String, CommitNode>,
    revision: u64,
}

impl GraphSnapshot {
    pub fn get(&self, commit_id: &str) -> Option<&CommitNode> {
        self.lookup.get(commit_id)
    }

    /// Nodes in display order
    pub fn commits(&self) -> impl Iterator<Item = &CommitNode> + '_ {
        self.order.iter().filter_map(|id| self.lookup.get(id))
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn lookup(&self) -> &HashMap<String, CommitNode> {
        &self.lookup
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Revision of the store this snapshot was taken from
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats::collect(self.commits())
    }
}

impl CommitLookup for GraphSnapshot {
    fn node(&self, id: &str) -> Option<&CommitNode> {
        self.get(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub total_commits: usize,
    pub total_edges: usize,
    pub merge_commits: usize,
    pub root_commits: usize,
    pub leaf_commits: usize,
    pub has_orphans: bool,
}

impl GraphStats {
    fn collect<'a>(nodes: impl Iterator<Item = &'a CommitNode>) -> Self {
        let mut stats = GraphStats::default();
        for node in nodes {
            stats.total_commits += 1;
            stats.total_edges += node.parent_ids.len();
            if node.is_merge() {
                stats.merge_commits += 1;
            }
            if node.is_root() {
                stats.root_commits += 1;
            }
            if node.descendant_ids.is_empty() {
                stats.leaf_commits += 1;
            }
        }
        stats.has_orphans = stats.root_commits > 1;
        stats
    }
}
