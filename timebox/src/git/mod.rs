// Version-control queries
//
// Commits are read from `git log --oneline --since <rfc3339>`. The watcher
// only depends on the CommitSource trait so tests can script the output.

pub mod watcher;

pub use watcher::CommitWatcher;

use chrono::{DateTime, SecondsFormat, Utc};
use std::io;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository: {0}")]
    NotARepository(String),
    #[error("git log failed ({status}): {output}")]
    CommandFailed { status: String, output: String },
    #[error("failed to run git: {0}")]
    Spawn(#[from] io::Error),
}

impl GitError {
    /// Whether polling again can ever succeed
    pub fn is_fatal(&self) -> bool {
        matches!(self, GitError::NotARepository(_))
    }
}

/// Anything that can list one-line commit summaries made since a point in time
pub trait CommitSource: Send + Sync + 'static {
    fn commits_since(&self, since: DateTime<Utc>) -> Result<Vec<String>, GitError>;
}

/// The `git` binary on PATH
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    repo_dir: Option<PathBuf>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run git inside `dir` instead of the current directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: Some(dir.into()),
        }
    }
}

impl CommitSource for GitCli {
    fn commits_since(&self, since: DateTime<Utc>) -> Result<Vec<String>, GitError> {
        let mut cmd = Command::new("git");
        if let Some(dir) = &self.repo_dir {
            cmd.current_dir(dir);
        }
        let output = cmd
            .args([
                "log",
                "--oneline",
                "--since",
                &since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ])
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        parse_log_output(output.status.success(), &output.status.to_string(), &stdout, &stderr)
    }
}

/// Interpret the result of a `git log --oneline` run
pub fn parse_log_output(
    success: bool,
    status: &str,
    stdout: &str,
    stderr: &str,
) -> Result<Vec<String>, GitError> {
    let combined = format!("{}{}", stdout, stderr);
    if combined.to_lowercase().contains("not a git repository") {
        return Err(GitError::NotARepository(combined.trim().to_string()));
    }
    if !success {
        return Err(GitError::CommandFailed {
            status: status.to_string(),
            output: combined.trim().to_string(),
        });
    }

    Ok(stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// De-duplication key for a commit summary line: its hash prefix
pub fn commit_key(line: &str) -> String {
    let hash = line.split_whitespace().next().unwrap_or(line);
    hash.chars().take(8).collect()
}
