/// Commands accepted by the monitor.
///
/// Every command names the output target that should receive its reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Clone and start tracking a new repository
    AddRepository {
        name: String,
        url: String,
        targets: Vec<String>,
        /// Branch patterns, defaults to all branches
        branches: Option<String>,
        reply_to: String,
    },

    /// Stop tracking a repository and delete its mirror
    RemoveRepository { name: String, reply_to: String },

    /// Repositories configured for the requesting target
    ListRepositories { reply_to: String },

    /// Show the last commits of a watched branch
    RepoLog {
        name: String,
        branch: String,
        count: usize,
        reply_to: String,
    },

    /// Show the watched branches of a repository
    RepoStat { name: String, reply_to: String },

    /// Show the options of a repository
    RepoConf { name: String, reply_to: String },

    /// Show the global options
    GitConf { reply_to: String },

    /// Fetch and notify now, all repositories or only `name`.
    /// `force` restarts a run already in progress.
    Poll {
        name: Option<String>,
        force: bool,
        reply_to: String,
    },

    /// Look up commit ids mentioned in a line of conversation
    Snarf { text: String, reply_to: String },
}

impl Command {
    pub fn reply_to(&self) -> &str {
        match self {
            Command::AddRepository { reply_to, .. }
            | Command::RemoveRepository { reply_to, .. }
            | Command::ListRepositories { reply_to }
            | Command::RepoLog { reply_to, .. }
            | Command::RepoStat { reply_to, .. }
            | Command::RepoConf { reply_to, .. }
            | Command::GitConf { reply_to }
            | Command::Poll { reply_to, .. }
            | Command::Snarf { reply_to, .. } => reply_to,
        }
    }
}

/// Candidate commit ids (6 to 40 hex digits, whole words) in `text`
pub fn find_commit_ids(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| (6..=40).contains(&word.len()))
        .filter(|word| word.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')))
        .collect()
}
