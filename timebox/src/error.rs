//! Crate-level error type

use std::path::PathBuf;
use thiserror::Error;

use crate::git::GitError;
use crate::rewrite::RewriteError;
use crate::state::StateError;
use crate::task::TimeboxError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid timebox: {0}")]
    Timebox(#[from] TimeboxError),

    #[error("ledger error: {0}")]
    State(#[from] StateError),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// The document no longer contains the task
    pub fn is_task_missing(&self) -> bool {
        matches!(self, Error::Rewrite(RewriteError::NotFound { .. }))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
