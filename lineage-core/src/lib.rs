//! Repository access and streaming ingestion for the commit graph.

pub mod backend;
pub mod config;
pub mod error;
pub mod ingest;
pub mod refs;
pub mod repository;
pub mod selection;
pub mod session;
pub mod throttle;

pub use backend::{Backend, CommitEvent, CommitStream};
pub use config::Config;
pub use error::{Error, Result};
pub use ingest::{IngestState, IngestionPipeline};
pub use refs::{LocalRef, Ref, Refs, RemoteRef};
pub use repository::{GitBackend, Repository};
pub use selection::ActiveSelection;
pub use session::{FetchStatus, RepoSession, SessionCommand, SessionHandle, SessionStatus};
pub use throttle::LosslessThrottle;
