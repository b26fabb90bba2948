//! Error types for repository sessions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// libgit2 failure while reading the repository
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The backend failed outside of git itself
    #[error("backend error: {0}")]
    Backend(String),

    /// The session task is gone
    #[error("session closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
