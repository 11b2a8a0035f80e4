#![allow(dead_code)]

use gitwatch_core::domain::{Author, Commit, Timestamp};
use gitwatch_core::ports::{DeliveryError, OutputSink, VcsError, VcsPort};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A commit with a recognizable id: `c` followed by `n` in hex, zero padded
pub fn commit(n: u32, author: &str, message: &str) -> Commit {
    Commit {
        id: format!("c{:06x}{}", n, "0".repeat(33)),
        author: Author {
            name: author.to_string(),
            email: format!("{}@example.com", author.to_lowercase()),
        },
        message: message.to_string(),
        timestamp: Timestamp::new(1_700_000_000 + i64::from(n) * 60, 0),
    }
}

type Branches = BTreeMap<String, Vec<Commit>>;

#[derive(Default)]
struct Mirror {
    url: String,
    branches: Branches,
}

#[derive(Default)]
struct FakeState {
    remotes: HashMap<String, Branches>,
    mirrors: HashMap<PathBuf, Mirror>,
    timeouts: HashSet<String>,
    unreachable: HashSet<String>,
}

/// In-memory VCS. Remotes are keyed by URL, mirrors by path; clone also
/// creates the mirror directory so existence checks on disk hold.
#[derive(Default)]
pub struct FakeVcs {
    state: Mutex<FakeState>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fetch_delay: Mutex<Duration>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_remote(&self, url: &str, branch: &str, commits: Vec<Commit>) {
        let mut state = self.state.lock().unwrap();
        state
            .remotes
            .entry(url.to_string())
            .or_default()
            .insert(branch.to_string(), commits);
    }

    pub fn push(&self, url: &str, branch: &str, commits: Vec<Commit>) {
        let mut state = self.state.lock().unwrap();
        state
            .remotes
            .get_mut(url)
            .and_then(|branches| branches.get_mut(branch))
            .expect("pushing to unknown remote branch")
            .extend(commits);
    }

    pub fn set_timeout(&self, url: &str, timeout: bool) {
        let mut state = self.state.lock().unwrap();
        if timeout {
            state.timeouts.insert(url.to_string());
        } else {
            state.timeouts.remove(url);
        }
    }

    pub fn set_unreachable(&self, url: &str) {
        self.state.lock().unwrap().unreachable.insert(url.to_string());
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most synchronizations seen in flight at the same time
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn with_mirror<T>(&self, path: &Path, f: impl FnOnce(&Mirror) -> Result<T, VcsError>) -> Result<T, VcsError> {
        let state = self.state.lock().unwrap();
        let mirror = state
            .mirrors
            .get(path)
            .ok_or_else(|| VcsError::NotFound(format!("no mirror at {}", path.display())))?;
        f(mirror)
    }

    fn chain_upto<'a>(mirror: &'a Mirror, id: &str) -> Option<&'a [Commit]> {
        mirror.branches.values().find_map(|chain| {
            chain
                .iter()
                .position(|c| c.id == id)
                .map(|pos| &chain[..=pos])
        })
    }
}

impl VcsPort for FakeVcs {
    fn clone_repo(&self, url: &str, path: &Path) -> Result<(), VcsError> {
        self.call();
        let mut state = self.state.lock().unwrap();
        if state.unreachable.contains(url) {
            return Err(VcsError::Transport(format!("cannot reach {}", url)));
        }
        let branches = state
            .remotes
            .get(url)
            .cloned()
            .ok_or_else(|| VcsError::NotFound(format!("repository {}", url)))?;
        fs::create_dir_all(path).map_err(|e| VcsError::Other(e.to_string()))?;
        state.mirrors.insert(
            path.to_path_buf(),
            Mirror {
                url: url.to_string(),
                branches,
            },
        );
        Ok(())
    }

    fn update_remote_refs(&self, path: &Path, _timeout: Option<Duration>) -> Result<(), VcsError> {
        self.call();
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let url = self.with_mirror(path, |mirror| Ok(mirror.url.clone()));
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.state.lock().unwrap().timeouts.contains(&url?) {
            return Err(VcsError::Timeout { seconds: 60 });
        }
        Ok(())
    }

    fn list_remote_branches(&self, path: &Path) -> Result<Vec<String>, VcsError> {
        self.call();
        let state = self.state.lock().unwrap();
        let mirror = state
            .mirrors
            .get(path)
            .ok_or_else(|| VcsError::NotFound(format!("no mirror at {}", path.display())))?;
        Ok(state
            .remotes
            .get(&mirror.url)
            .map(|branches| branches.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn fetch_branch(&self, path: &Path, branch: &str, _timeout: Option<Duration>) -> Result<(), VcsError> {
        self.call();
        let mut state = self.state.lock().unwrap();
        let url = state
            .mirrors
            .get(path)
            .map(|m| m.url.clone())
            .ok_or_else(|| VcsError::NotFound(format!("no mirror at {}", path.display())))?;
        if state.timeouts.contains(&url) {
            return Err(VcsError::Timeout { seconds: 60 });
        }
        let chain = state
            .remotes
            .get(&url)
            .and_then(|branches| branches.get(branch))
            .cloned()
            .ok_or_else(|| VcsError::NotFound(format!("branch {}", branch)))?;
        if let Some(mirror) = state.mirrors.get_mut(path) {
            mirror.branches.insert(branch.to_string(), chain);
        }
        Ok(())
    }

    fn commits_between(&self, path: &Path, from: Option<&str>, to: &str) -> Result<Vec<Commit>, VcsError> {
        self.call();
        self.with_mirror(path, |mirror| {
            let chain = mirror
                .branches
                .get(to)
                .map(Vec::as_slice)
                .or_else(|| Self::chain_upto(mirror, to))
                .ok_or_else(|| VcsError::NotFound(to.to_string()))?;
            let start = from
                .and_then(|from| chain.iter().position(|c| c.id == from))
                .map_or(0, |pos| pos + 1);
            Ok(chain[start..].to_vec())
        })
    }

    fn resolve_branch_tip(&self, path: &Path, branch: &str) -> Result<String, VcsError> {
        self.call();
        self.with_mirror(path, |mirror| {
            mirror
                .branches
                .get(branch)
                .and_then(|chain| chain.last())
                .map(|c| c.id.clone())
                .ok_or_else(|| VcsError::NotFound(format!("branch {}", branch)))
        })
    }

    fn recent_commits(&self, path: &Path, branch: &str, count: usize) -> Result<Vec<Commit>, VcsError> {
        self.call();
        self.with_mirror(path, |mirror| {
            let chain = mirror
                .branches
                .get(branch)
                .ok_or_else(|| VcsError::NotFound(format!("branch {}", branch)))?;
            Ok(chain.iter().rev().take(count).cloned().collect())
        })
    }

    fn find_commit(&self, path: &Path, rev: &str) -> Result<Commit, VcsError> {
        self.call();
        self.with_mirror(path, |mirror| {
            mirror
                .branches
                .values()
                .flatten()
                .find(|c| c.id.starts_with(rev))
                .cloned()
                .ok_or_else(|| VcsError::NotFound(rev.to_string()))
        })
    }
}

/// Sink recording every line per target
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reject(&self, target: &str) {
        self.rejected.lock().unwrap().insert(target.to_string());
    }

    /// Lines sent to `target` so far, without clearing them
    pub fn lines_for(&self, target: &str) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Drain the lines sent to `target`
    pub fn take(&self, target: &str) -> Vec<String> {
        let mut lines = self.lines.lock().unwrap();
        let (taken, kept): (Vec<_>, Vec<_>) = lines.drain(..).partition(|(t, _)| t == target);
        *lines = kept;
        taken.into_iter().map(|(_, line)| line).collect()
    }
}

impl OutputSink for RecordingSink {
    fn send(&self, target: &str, line: &str) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::new("connection lost"));
        }
        self.lines
            .lock()
            .unwrap()
            .push((target.to_string(), line.to_string()));
        Ok(())
    }

    fn accepts(&self, target: &str) -> bool {
        !self.rejected.lock().unwrap().contains(target)
    }
}
