use crate::domain::commit::Commit;
use crate::domain::repo::CommitsByBranch;
use crate::format::{format_commit, TemplateContext};

/// Why commits are being displayed; decides headers and template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayKind {
    /// New commits found by a poll
    Commits,
    /// Explicit log request, never grouped
    RepoLog,
    /// A commit id mentioned in conversation
    Snarf,
}

/// Everything needed to turn commits into output lines
#[derive(Debug, Clone)]
pub struct DisplaySettings<'a> {
    pub kind: DisplayKind,
    pub repo_name: &'a str,
    pub repo_url: &'a str,
    pub template: &'a str,
    pub group_header: bool,
    /// Most commits shown at once, 0 means unlimited
    pub max_commits: usize,
}

impl DisplaySettings<'_> {
    fn use_group_header(&self) -> bool {
        self.group_header && self.kind != DisplayKind::RepoLog
    }
}

/// Render commits grouped per branch and author.
///
/// Commits are expected oldest first within each branch. When more than
/// `max_commits` are given, a notice line is emitted first and only the
/// most recent ones are shown.
pub fn render_commits(settings: &DisplaySettings<'_>, commits_by_branch: &CommitsByBranch) -> Vec<String> {
    let mut lines = Vec::new();
    let (shown, total) = limit_commits(commits_by_branch, settings.max_commits);
    if shown.len() < total {
        lines.push(format!(
            "Showing latest {} of {} commits to {}...",
            shown.len(),
            total,
            settings.repo_name
        ));
    }

    for (branch, commits) in commits_by_branch {
        let ctx = TemplateContext {
            repo_name: settings.repo_name,
            repo_url: settings.repo_url,
            branch,
        };

        for author in authors_in_order(commits) {
            let group: Vec<&Commit> = commits
                .iter()
                .enumerate()
                .filter(|(i, c)| c.author.name == author && shown.contains(&(branch.as_str(), *i)))
                .map(|(_, c)| c)
                .collect();
            let Some(first) = group.first() else {
                continue;
            };

            if settings.use_group_header() {
                lines.push(group_header(settings, &author, branch, group.len(), first));
            }
            for commit in group {
                lines.extend(format_commit(settings.template, commit, &ctx));
            }
        }
    }

    lines
}

/// Pick the most recent commits across all branches.
/// Returns the kept `(branch, index)` positions and the total count.
fn limit_commits(commits_by_branch: &CommitsByBranch, max: usize) -> (Vec<(&str, usize)>, usize) {
    let mut all: Vec<(&str, usize, &Commit)> = commits_by_branch
        .iter()
        .flat_map(|(branch, commits)| {
            commits
                .iter()
                .enumerate()
                .map(move |(i, c)| (branch.as_str(), i, c))
        })
        .collect();
    let total = all.len();

    all.sort_by_key(|(_, _, c)| c.timestamp.seconds);
    let skip = if max > 0 { total.saturating_sub(max) } else { 0 };
    let kept = all.into_iter().skip(skip).map(|(b, i, _)| (b, i)).collect();
    (kept, total)
}

fn authors_in_order(commits: &[Commit]) -> Vec<String> {
    let mut authors: Vec<String> = Vec::new();
    for commit in commits {
        if !authors.contains(&commit.author.name) {
            authors.push(commit.author.name.clone());
        }
    }
    authors
}

fn group_header(
    settings: &DisplaySettings<'_>,
    author: &str,
    branch: &str,
    count: usize,
    first: &Commit,
) -> String {
    match settings.kind {
        DisplayKind::Snarf => format!("Talking about {}?", first.short_id()),
        _ => format!(
            "{} pushed {} commit(s) to {} at {}",
            author, count, branch, settings.repo_name
        ),
    }
}
