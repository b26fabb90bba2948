//! Boundary to the service that reads repositories.

use crate::error::Result;
use crate::refs::Ref;
use async_trait::async_trait;
use graph::CommitRecord;
use std::path::Path;
use tokio::sync::mpsc;

/// Commits in display order. An `Err` item ends the stream early.
pub type CommitStream = mpsc::Receiver<Result<CommitRecord>>;

/// One fetch cycle as seen by the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitEvent {
    Start,
    Update(CommitRecord),
    End,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Start streaming the commits of the repository at `path`.
    ///
    /// Dropping the returned stream must stop the producer.
    async fn get_commits(&self, path: &Path) -> Result<CommitStream>;

    /// Every reference of the repository, including one `Head` entry when
    /// HEAD resolves to a commit.
    async fn get_refs(&self, path: &Path) -> Result<Vec<Ref>>;
}
