use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::commit::Commit;

/// Default first line used to announce a commit: bracketed and colored
/// author, message, branch and short id.
pub const DEFAULT_COMMIT_MESSAGE: &str =
    "%(15)%![%!%(09)%a%(15)%!|%!%(04)%m%(15)%!|%!%(13)%b%(15)%!|%!%(02)%c%(15)%!]%! %m";

/// Default template for commits mentioned in conversation
pub const DEFAULT_SNARF_MESSAGE: &str = "I. e., [%n|%a] %m";

/// Per-repository options, persisted alongside the repository name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoOptions {
    /// URL of the remote, or a path on disk
    pub url: String,
    /// Output targets receiving notifications for this repository
    pub targets: Vec<String>,
    /// Space separated branch patterns, `*` means all branches
    pub branches: String,
    pub commit_message: String,
    pub snarf_message: String,
    pub enable_snarf: bool,
    pub group_header: bool,
    /// Max time for a single fetch in seconds, 0 disables the timeout
    pub fetch_timeout_secs: u64,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            targets: Vec::new(),
            branches: "*".to_string(),
            commit_message: DEFAULT_COMMIT_MESSAGE.to_string(),
            snarf_message: DEFAULT_SNARF_MESSAGE.to_string(),
            enable_snarf: true,
            group_header: true,
            fetch_timeout_secs: 60,
        }
    }
}

impl RepoOptions {
    pub fn new(url: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            url: url.into(),
            targets,
            ..Self::default()
        }
    }

    pub fn with_branches(mut self, branches: impl Into<String>) -> Self {
        self.branches = branches.into();
        self
    }

    pub fn is_subscribed(&self, target: &str) -> bool {
        self.targets.iter().any(|t| t == target)
    }

    /// Option name/value pairs, as shown by the repoconf command
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        vec![
            ("url", self.url.clone()),
            ("targets", self.targets.join(" ")),
            ("branches", self.branches.clone()),
            ("commit_message", self.commit_message.clone()),
            ("snarf_message", self.snarf_message.clone()),
            ("enable_snarf", self.enable_snarf.to_string()),
            ("group_header", self.group_header.to_string()),
            ("fetch_timeout_secs", self.fetch_timeout_secs.to_string()),
        ]
    }
}

/// Commits found on one branch since its cursor
#[derive(Debug, Clone, PartialEq)]
pub struct BranchDelta {
    /// Current tip of the branch in the mirror
    pub tip: String,
    /// New commits, oldest first
    pub commits: Vec<Commit>,
}

/// New commits keyed by branch name
pub type CommitsByBranch = BTreeMap<String, Vec<Commit>>;
