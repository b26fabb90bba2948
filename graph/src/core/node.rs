use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A commit as streamed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Unique commit ID (SHA)
    pub id: String,
    /// Parent commit IDs, first parent first
    pub parent_ids: Vec<String>,
    /// Commit time in epoch seconds
    pub time: i64,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl CommitRecord {
    pub fn new(id: impl Into<String>, parent_ids: Vec<String>, time: i64) -> Self {
        Self {
            id: id.into(),
            parent_ids,
            time,
            summary: None,
            author: None,
        }
    }
}

/// A commit node in the graph store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitNode {
    /// Unique commit ID (SHA)
    pub id: String,
    /// Commit time in epoch seconds
    pub time: i64,
    /// Parent commit IDs
    pub parent_ids: SmallVec<[String; 2]>,
    /// Children registered so far (inverse of `parent_ids`)
    pub descendant_ids: Vec<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
}

impl CommitNode {
    pub fn from_record(record: CommitRecord, descendant_ids: Vec<String>) -> Self {
        Self {
            id: record.id,
            time: record.time,
            parent_ids: SmallVec::from_vec(record.parent_ids),
            descendant_ids,
            summary: record.summary,
            author: record.author,
        }
    }

    /// Replace the streamed fields, keeping registered descendants
    pub(crate) fn refresh(&mut self, record: CommitRecord) {
        self.time = record.time;
        self.parent_ids = SmallVec::from_vec(record.parent_ids);
        self.summary = record.summary;
        self.author = record.author;
    }

    /// Check if this is a root commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    /// Check if this is a merge commit (multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() > 1
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.time, 0).single()
    }

    pub fn short_id(&self) -> &str {
        self.id.get(..7).unwrap_or(&self.id)
    }
}
