use gitwatch_core::domain::{match_branches, BranchDelta, Commit, RepoOptions};
use gitwatch_core::ports::{VcsError, VcsPort};
use gitwatch_core::{CoreError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One tracked repository: its mirror, watched branches and cursors.
///
/// The mirror and the cursors are guarded by a single lock, taken for the
/// whole of a synchronize or a cursor read/advance. The fetch worker and
/// the command context may both touch a handle; the command context only
/// ever tries that lock, and reads the watched branch names from a
/// separate snapshot.
pub struct RepositoryHandle {
    name: String,
    path: PathBuf,
    options: RepoOptions,
    vcs: Arc<dyn VcsPort>,
    state: Mutex<HandleState>,
    /// Copy of the cursor keys, refreshed whenever branches are resolved
    watched: Mutex<Vec<String>>,
    /// Set once the mirror is destroyed; the handle is inert afterwards
    retired: AtomicBool,
}

#[derive(Default)]
struct HandleState {
    /// Watched branch -> last notified commit. `None` until the branch
    /// has been fetched once.
    cursors: BTreeMap<String, Option<String>>,
}

impl RepositoryHandle {
    /// A handle whose mirror lives in `repo_dir/name`
    pub fn new(name: impl Into<String>, options: RepoOptions, repo_dir: &Path, vcs: Arc<dyn VcsPort>) -> Self {
        let name = name.into();
        Self {
            path: repo_dir.join(&name),
            name,
            options,
            vcs,
            state: Mutex::new(HandleState::default()),
            watched: Mutex::new(Vec::new()),
            retired: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &RepoOptions {
        &self.options
    }

    pub fn targets(&self) -> &[String] {
        &self.options.targets
    }

    /// Watched branches, sorted. Never waits for a synchronize.
    pub fn branches(&self) -> Vec<String> {
        self.watched.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn cursor(&self, branch: &str) -> Option<String> {
        self.lock().cursors.get(branch).cloned().flatten()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn fetch_timeout(&self) -> Option<Duration> {
        match self.options.fetch_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The state lock, unless a synchronize holds it
    fn try_lock(&self) -> Result<MutexGuard<'_, HandleState>> {
        match self.state.try_lock() {
            Ok(state) => Ok(state),
            Err(TryLockError::Poisoned(e)) => Ok(e.into_inner()),
            Err(TryLockError::WouldBlock) => Err(CoreError::Busy {
                name: self.name.clone(),
            }),
        }
    }

    /// Create the local mirror from the remote URL
    pub fn clone_mirror(&self) -> Result<()> {
        let _state = self.lock();
        info!("Cloning {} from {}", self.name, self.options.url);
        self.vcs
            .clone_repo(&self.options.url, &self.path)
            .map_err(|source| CoreError::Clone {
                name: self.name.clone(),
                source,
            })
    }

    /// Bring the mirror up to date with the remote.
    ///
    /// Branch patterns are re-resolved against the remote branch list,
    /// then every watched branch is fetched. A failing branch is logged
    /// and recorded and the others are still fetched. Branches fetched for
    /// the first time get their cursor set to the tip without announcing
    /// their history.
    pub fn synchronize(&self) -> Vec<CoreError> {
        let mut state = self.lock();
        let timeout = self.fetch_timeout();
        let mut failures = Vec::new();

        if self.is_retired() {
            debug!("Skipping synchronize of removed {}", self.name);
            return failures;
        }

        if !self.path.exists() {
            info!("Mirror of {} missing, cloning", self.name);
            if let Err(source) = self.vcs.clone_repo(&self.options.url, &self.path) {
                let err = CoreError::Clone {
                    name: self.name.clone(),
                    source,
                };
                error!("{}", err);
                failures.push(err);
                return failures;
            }
        }

        if let Err(e) = self.vcs.update_remote_refs(&self.path, timeout) {
            let err = CoreError::from_branch_failure(&self.name, "*", e);
            error!("Cannot update remote refs: {}", err);
            failures.push(err);
            return failures;
        }

        match self.vcs.list_remote_branches(&self.path) {
            Ok(remote) => self.resolve_branches(&mut state, &remote),
            Err(e) => {
                let err = CoreError::from_branch_failure(&self.name, "*", e);
                error!("Cannot list remote branches: {}", err);
                failures.push(err);
            }
        }

        let branches: Vec<String> = state.cursors.keys().cloned().collect();
        for branch in branches {
            if let Err(e) = self.vcs.fetch_branch(&self.path, &branch, timeout) {
                let err = CoreError::from_branch_failure(&self.name, &branch, e);
                error!("{}", err);
                failures.push(err);
                continue;
            }

            if state.cursors.get(&branch).is_some_and(Option::is_none) {
                match self.vcs.resolve_branch_tip(&self.path, &branch) {
                    Ok(tip) => {
                        debug!("Baseline of {}/{} at {}", self.name, branch, tip);
                        state.cursors.insert(branch, Some(tip));
                    }
                    Err(e) => failures.push(CoreError::from_branch_failure(&self.name, &branch, e)),
                }
            }
        }

        failures
    }

    /// Synchronize a freshly cloned mirror and move every cursor to its
    /// branch tip, so nothing that predates tracking gets announced
    pub fn initialize(&self) -> Vec<CoreError> {
        let mut failures = self.synchronize();

        let mut state = self.lock();
        for (branch, cursor) in state.cursors.iter_mut() {
            match self.vcs.resolve_branch_tip(&self.path, branch) {
                Ok(tip) => *cursor = Some(tip),
                Err(e) => failures.push(CoreError::from_branch_failure(&self.name, branch, e)),
            }
        }
        info!("Initialized {} with {} branches", self.name, state.cursors.len());
        failures
    }

    fn resolve_branches(&self, state: &mut HandleState, remote: &[String]) {
        let matched = match_branches(&self.options.branches, remote);
        for pattern in &matched.unmatched {
            warn!("No branch in {} matches {}", self.name, pattern);
        }
        if matched.branches.is_empty() {
            error!("No branch in {} matches: {}", self.name, self.options.branches);
        }

        state.cursors.retain(|branch, _| {
            let keep = matched.branches.contains(branch);
            if !keep {
                info!("Branch {} vanished from {}, no longer watched", branch, self.name);
            }
            keep
        });
        for branch in matched.branches {
            state.cursors.entry(branch).or_insert(None);
        }
        let watched = state.cursors.keys().cloned().collect();
        *self.watched.lock().unwrap_or_else(PoisonError::into_inner) = watched;
    }

    /// Commits on each branch that are newer than its cursor.
    ///
    /// Branches without a cursor report their tip and no commits, so that
    /// advancing to the tip sets the baseline.
    pub fn new_commits_per_branch(&self) -> Result<BTreeMap<String, BranchDelta>> {
        let state = self.lock();
        let mut deltas = BTreeMap::new();

        for (branch, cursor) in &state.cursors {
            let sync_error = |source: VcsError| CoreError::Sync {
                repo: self.name.clone(),
                branch: branch.clone(),
                source,
            };

            let tip = self
                .vcs
                .resolve_branch_tip(&self.path, branch)
                .map_err(sync_error)?;
            let commits = match cursor {
                Some(cursor) if *cursor != tip => self
                    .vcs
                    .commits_between(&self.path, Some(cursor.as_str()), &tip)
                    .map_err(sync_error)?,
                _ => Vec::new(),
            };

            debug!(
                "Poll: branch: {} last commit: {}, {} commits",
                branch,
                cursor.as_deref().map(|c| &c[..c.len().min(7)]).unwrap_or("-"),
                commits.len()
            );
            deltas.insert(branch.clone(), BranchDelta { tip, commits });
        }

        Ok(deltas)
    }

    /// Record that everything up to `commit_id` has been announced on `branch`
    pub fn advance_cursor(&self, branch: &str, commit_id: &str) -> Result<()> {
        let mut state = self.lock();
        match state.cursors.get_mut(branch) {
            Some(cursor) => {
                *cursor = Some(commit_id.to_string());
                Ok(())
            }
            None => Err(CoreError::BranchNotFound {
                repo: self.name.clone(),
                branch: branch.to_string(),
            }),
        }
    }

    /// The latest `count` commits of a watched branch, oldest first.
    /// Fails with `CoreError::Busy` while the mirror is being synchronized.
    pub fn recent_commits(&self, branch: &str, count: usize) -> Result<Vec<Commit>> {
        let state = self.try_lock()?;
        if !state.cursors.contains_key(branch) {
            return Err(CoreError::BranchNotFound {
                repo: self.name.clone(),
                branch: branch.to_string(),
            });
        }

        let mut commits = self
            .vcs
            .recent_commits(&self.path, branch, count)
            .map_err(|source| CoreError::Sync {
                repo: self.name.clone(),
                branch: branch.to_string(),
                source,
            })?;
        commits.reverse();
        Ok(commits)
    }

    /// Look up a commit in the mirror, `None` if it is not there or the
    /// mirror is being synchronized
    pub fn find_commit(&self, rev: &str) -> Option<Commit> {
        let _state = match self.try_lock() {
            Ok(state) => state,
            Err(e) => {
                debug!("Lookup of {} skipped: {}", rev, e);
                return None;
            }
        };
        match self.vcs.find_commit(&self.path, rev) {
            Ok(commit) => Some(commit),
            Err(VcsError::NotFound(_)) => None,
            Err(e) => {
                debug!("Lookup of {} in {} failed: {}", rev, self.name, e);
                None
            }
        }
    }

    /// Delete the local mirror
    pub fn destroy(&self) -> std::io::Result<()> {
        let _state = self.lock();
        self.retired.store(true, Ordering::SeqCst);
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path)?;
        }
        info!("Removed mirror of {} at {}", self.name, self.path.display());
        Ok(())
    }
}

impl fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryHandle")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
