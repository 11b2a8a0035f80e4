use crate::domain::commit::Commit;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Failure of a version control operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VcsError {
    /// No such repository, ref or object
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or remote side failure
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("{0}")]
    Other(String),
}

/// Port for the version control client.
///
/// All calls are blocking; callers run them off the command context.
/// `timeout` of `None` disables the time limit.
pub trait VcsPort: Send + Sync {
    /// Clone `url` into `path`
    fn clone_repo(&self, url: &str, path: &Path) -> Result<(), VcsError>;

    /// Refresh all remote-tracking refs of the mirror
    fn update_remote_refs(&self, path: &Path, timeout: Option<Duration>) -> Result<(), VcsError>;

    /// Branch names advertised by the remote (without the remote prefix)
    fn list_remote_branches(&self, path: &Path) -> Result<Vec<String>, VcsError>;

    /// Fetch `branch` and fast-forward the local branch to it
    fn fetch_branch(&self, path: &Path, branch: &str, timeout: Option<Duration>)
        -> Result<(), VcsError>;

    /// Commits reachable from `to` but not from `from`, oldest first.
    /// `from` of `None` walks the whole history of `to`.
    fn commits_between(&self, path: &Path, from: Option<&str>, to: &str)
        -> Result<Vec<Commit>, VcsError>;

    /// Commit id of the local branch tip
    fn resolve_branch_tip(&self, path: &Path, branch: &str) -> Result<String, VcsError>;

    /// The latest `count` commits of a branch, newest first
    fn recent_commits(&self, path: &Path, branch: &str, count: usize)
        -> Result<Vec<Commit>, VcsError>;

    /// Look up a commit by (possibly abbreviated) id
    fn find_commit(&self, path: &Path, rev: &str) -> Result<Commit, VcsError>;
}
