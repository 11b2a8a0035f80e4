use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    BranchType, ErrorClass, ErrorCode, FetchOptions, FetchPrune, Oid, RemoteCallbacks,
    Repository as GitRepository, Sort,
};
use gitwatch_core::domain::{Author, Commit, Timestamp};
use gitwatch_core::ports::{VcsError, VcsPort};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const REMOTE: &str = "origin";

/// Serializes writes to libgit2's process-wide socket timeouts
static SERVER_TIMEOUTS: Mutex<()> = Mutex::new(());

/// Bound connect and socket reads so a remote that accepts and then stalls
/// fails with `ErrorCode::Timeout` instead of blocking the worker.
fn set_server_timeouts(timeout: Option<Duration>) {
    let millis = timeout.map_or(0, |t| i32::try_from(t.as_millis()).unwrap_or(i32::MAX).max(1));
    let _guard = SERVER_TIMEOUTS.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: libgit2 stores these in plain ints; writers are serialized by
    // SERVER_TIMEOUTS and readers only copy the value when opening a socket.
    let result = unsafe {
        git2::opts::set_server_connect_timeout_in_milliseconds(millis)
            .and_then(|_| git2::opts::set_server_timeout_in_milliseconds(millis))
    };
    if let Err(e) = result {
        warn!("Cannot set server timeouts: {}", e.message());
    }
}

/// Git adapter that implements VcsPort using git2.
///
/// Mirrors are regular clones. Watched branches are kept as local
/// branches that follow `origin/<branch>`.
#[derive(Debug, Default)]
pub struct Git2Vcs;

impl Git2Vcs {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> Result<GitRepository, VcsError> {
        GitRepository::open(path).map_err(|e| {
            VcsError::NotFound(format!("no git repository at {}: {}", path.display(), e.message()))
        })
    }

    /// Fetch `refspecs` from origin, aborting the transfer once `timeout` elapses
    fn fetch_with_deadline(
        repo: &GitRepository,
        refspecs: &[&str],
        timeout: Option<Duration>,
        prune: bool,
    ) -> Result<(), VcsError> {
        let mut remote = repo
            .find_remote(REMOTE)
            .map_err(|e| VcsError::NotFound(format!("remote '{}': {}", REMOTE, e.message())))?;

        set_server_timeouts(timeout);
        let deadline = timeout.map(|t| Instant::now() + t);
        let in_time = move || deadline.map_or(true, |d| Instant::now() < d);

        let mut callbacks = RemoteCallbacks::new();
        callbacks.transfer_progress(move |_| in_time());
        callbacks.sideband_progress(move |_| in_time());

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);
        if prune {
            fetch_options.prune(FetchPrune::On);
        }

        remote
            .fetch(refspecs, Some(&mut fetch_options), None)
            .map_err(|e| match (timeout, deadline) {
                (Some(t), Some(d)) if e.code() == ErrorCode::Timeout || Instant::now() >= d => {
                    VcsError::Timeout {
                        seconds: t.as_secs(),
                    }
                }
                _ => map_git_error(e),
            })
    }

    fn tip_of(repo: &GitRepository, branch: &str) -> Result<Oid, VcsError> {
        repo.refname_to_id(&format!("refs/heads/{}", branch))
            .or_else(|_| repo.refname_to_id(&format!("refs/remotes/{}/{}", REMOTE, branch)))
            .map_err(|_| VcsError::NotFound(format!("branch {}", branch)))
    }
}

fn map_git_error(e: git2::Error) -> VcsError {
    if e.code() == ErrorCode::NotFound {
        return VcsError::NotFound(e.message().to_string());
    }
    match e.class() {
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Ssl => {
            VcsError::Transport(e.message().to_string())
        }
        _ => VcsError::Other(e.message().to_string()),
    }
}

fn to_commit(commit: &git2::Commit<'_>) -> Commit {
    let author = commit.author();
    Commit {
        id: commit.id().to_string(),
        author: Author {
            name: author.name().unwrap_or("").to_string(),
            email: author.email().unwrap_or("").to_string(),
        },
        message: String::from_utf8_lossy(commit.message_bytes()).to_string(),
        timestamp: Timestamp::new(commit.time().seconds(), commit.time().offset_minutes()),
    }
}

impl VcsPort for Git2Vcs {
    fn clone_repo(&self, url: &str, path: &Path) -> Result<(), VcsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| VcsError::Other(e.to_string()))?;
        }
        if path.exists() {
            fs::remove_dir_all(path).map_err(|e| VcsError::Other(e.to_string()))?;
        }

        set_server_timeouts(None);
        RepoBuilder::new().clone(url, path).map_err(map_git_error)?;
        debug!("Cloned {} into {}", url, path.display());
        Ok(())
    }

    fn update_remote_refs(&self, path: &Path, timeout: Option<Duration>) -> Result<(), VcsError> {
        let repo = Self::open(path)?;
        Self::fetch_with_deadline(&repo, &[] as &[&str], timeout, true)
    }

    fn list_remote_branches(&self, path: &Path) -> Result<Vec<String>, VcsError> {
        let repo = Self::open(path)?;
        let prefix = format!("{}/", REMOTE);

        let mut branches = Vec::new();
        for entry in repo.branches(Some(BranchType::Remote)).map_err(map_git_error)? {
            let (branch, _) = entry.map_err(map_git_error)?;
            let Some(name) = branch.name().map_err(map_git_error)? else {
                continue;
            };
            if let Some(short) = name.strip_prefix(&prefix) {
                if short != "HEAD" {
                    branches.push(short.to_string());
                }
            }
        }
        branches.sort();
        Ok(branches)
    }

    fn fetch_branch(&self, path: &Path, branch: &str, timeout: Option<Duration>) -> Result<(), VcsError> {
        let repo = Self::open(path)?;
        let refspec = format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, REMOTE);
        Self::fetch_with_deadline(&repo, &[refspec.as_str()], timeout, false)?;

        let target = repo
            .refname_to_id(&format!("refs/remotes/{}/{}", REMOTE, branch))
            .map_err(map_git_error)?;
        let local_name = format!("refs/heads/{}", branch);

        if let Ok(current) = repo.refname_to_id(&local_name) {
            if current == target {
                return Ok(());
            }
            if !repo.graph_descendant_of(target, current).unwrap_or(false) {
                warn!("Non fast-forward update of {} in {}", branch, path.display());
            }
        }

        repo.reference(&local_name, target, true, "gitwatch: fetch")
            .map_err(map_git_error)?;

        let is_head = repo
            .head()
            .ok()
            .and_then(|head| head.name().map(|n| n == local_name))
            .unwrap_or(false);
        if is_head {
            repo.checkout_head(Some(CheckoutBuilder::new().force()))
                .map_err(map_git_error)?;
        }
        Ok(())
    }

    fn commits_between(&self, path: &Path, from: Option<&str>, to: &str) -> Result<Vec<Commit>, VcsError> {
        let repo = Self::open(path)?;
        let to_oid = match Self::tip_of(&repo, to) {
            Ok(oid) => oid,
            Err(_) => repo.revparse_single(to).map_err(map_git_error)?.id(),
        };

        let mut revwalk = repo.revwalk().map_err(map_git_error)?;
        revwalk.push(to_oid).map_err(map_git_error)?;
        if let Some(from) = from {
            let from_oid = Oid::from_str(from).map_err(map_git_error)?;
            revwalk.hide(from_oid).map_err(map_git_error)?;
        }
        revwalk
            .set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)
            .map_err(map_git_error)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            let oid = oid.map_err(map_git_error)?;
            let commit = repo.find_commit(oid).map_err(map_git_error)?;
            commits.push(to_commit(&commit));
        }
        Ok(commits)
    }

    fn resolve_branch_tip(&self, path: &Path, branch: &str) -> Result<String, VcsError> {
        let repo = Self::open(path)?;
        Self::tip_of(&repo, branch).map(|oid| oid.to_string())
    }

    fn recent_commits(&self, path: &Path, branch: &str, count: usize) -> Result<Vec<Commit>, VcsError> {
        let repo = Self::open(path)?;
        let tip = Self::tip_of(&repo, branch)?;

        let mut revwalk = repo.revwalk().map_err(map_git_error)?;
        revwalk.push(tip).map_err(map_git_error)?;
        revwalk.set_sorting(Sort::TOPOLOGICAL).map_err(map_git_error)?;

        let mut commits = Vec::new();
        for oid in revwalk.take(count) {
            let oid = oid.map_err(map_git_error)?;
            let commit = repo.find_commit(oid).map_err(map_git_error)?;
            commits.push(to_commit(&commit));
        }
        Ok(commits)
    }

    fn find_commit(&self, path: &Path, rev: &str) -> Result<Commit, VcsError> {
        let repo = Self::open(path)?;
        let commit = repo
            .revparse_single(rev)
            .and_then(|object| object.peel_to_commit())
            .map_err(map_git_error)?;
        Ok(to_commit(&commit))
    }
}
