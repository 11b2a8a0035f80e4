use anyhow::{bail, Result};
use gitwatch_core::app::{find_commit_ids, render_commits, Command, DisplayKind, DisplaySettings};
use gitwatch_core::domain::{CommitsByBranch, RepoOptions};
use gitwatch_core::ports::{MonitorConfig, OutputSink, RepoStore, VcsPort};
use gitwatch_core::CoreError;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing::{debug, info, warn};

use super::handle::RepositoryHandle;
use super::inbox::{inbox, CallbackId, Inbox, InboxReceiver, Task};
use super::notifier::Notifier;
use super::registry::RepositoryRegistry;
use super::scheduler::{Completion, PollScheduler, Trigger, TriggerOutcome};

/// The command context.
///
/// Owns the registry, the scheduler and the notifier. Commands, timer
/// ticks and completions posted by background jobs are all handled here,
/// one at a time; only fetch runs, clones and mirror deletions leave this
/// context.
pub struct Monitor {
    config: MonitorConfig,
    vcs: Arc<dyn VcsPort>,
    sink: Arc<dyn OutputSink>,
    registry: Arc<RepositoryRegistry>,
    scheduler: PollScheduler,
    notifier: Notifier,
    inbox: Inbox,
    inbox_rx: Option<InboxReceiver>,
    /// Repositories added but still cloning
    pending_clones: HashSet<String>,
    /// Repositories removed whose mirror is not deleted yet
    pending_destroys: HashSet<String>,
}

impl Monitor {
    /// Build the context and restore the persisted repositories.
    /// Mirrors that went missing are cloned again by the first poll.
    pub fn new(
        config: MonitorConfig,
        vcs: Arc<dyn VcsPort>,
        store: Arc<dyn RepoStore>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self> {
        let registry = RepositoryRegistry::restore(store, |name, options| {
            RepositoryHandle::new(name, options, &config.repo_dir, vcs.clone())
        })?;
        let registry = Arc::new(registry);

        let (inbox, inbox_rx) = inbox();
        let scheduler = PollScheduler::new(
            registry.clone(),
            inbox.clone(),
            Duration::from_secs(config.poll_period_secs),
            Duration::from_secs(config.join_timeout_secs),
        );
        let notifier = Notifier::new(sink.clone(), config.max_commits_at_once);

        Ok(Self {
            config,
            vcs,
            sink,
            registry,
            scheduler,
            notifier,
            inbox,
            inbox_rx: Some(inbox_rx),
            pending_clones: HashSet::new(),
            pending_destroys: HashSet::new(),
        })
    }

    pub fn registry(&self) -> &Arc<RepositoryRegistry> {
        &self.registry
    }

    /// Whether a fetch run, a clone or a mirror deletion is still outstanding
    pub fn is_busy(&self) -> bool {
        self.scheduler.is_running()
            || !self.pending_clones.is_empty()
            || !self.pending_destroys.is_empty()
    }

    /// Serve commands and timer ticks until `shutdown` resolves, then stop
    pub async fn run<S>(mut self, mut commands: mpsc::UnboundedReceiver<Command>, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let Some(mut inbox_rx) = self.inbox_rx.take() else {
            bail!("Monitor is already running");
        };
        let mut ticker = self.scheduler.ticker();
        if ticker.is_none() {
            info!("Periodic polling disabled");
        }
        let mut commands_open = true;
        tokio::pin!(shutdown);

        info!("Monitoring {} repositories", self.registry.names().len());
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = next_tick(&mut ticker) => {
                    self.scheduler.trigger(Trigger::Tick);
                }
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        debug!("Command channel closed");
                        commands_open = false;
                    }
                },
                Some((id, task)) = inbox_rx.recv() => {
                    self.handle_task(id, task);
                }
            }
        }

        self.inbox_rx = Some(inbox_rx);
        self.stop().await;
        Ok(())
    }

    /// Handle posted tasks until no background job is outstanding
    pub async fn drain(&mut self) {
        while self.is_busy() {
            let next = match self.inbox_rx.as_mut() {
                Some(rx) => rx.recv().await,
                None => return,
            };
            match next {
                Some((id, task)) => self.handle_task(id, task),
                None => return,
            }
        }
    }

    /// Stop polling. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.scheduler.stop().await;
    }

    fn reply(&self, target: &str, line: &str) {
        if let Err(e) = self.sink.send(target, line) {
            warn!("Cannot reply to {}: {}", target, e);
        }
    }

    /// Look up a repository on behalf of `target`, replying on refusal
    fn authorized(&self, name: &str, target: &str) -> Option<Arc<RepositoryHandle>> {
        match self.registry.get(name) {
            Ok(handle) if handle.options().is_subscribed(target) => Some(handle),
            Ok(_) => {
                self.reply(target, "Sorry, not allowed in this channel.");
                None
            }
            Err(e) => {
                self.reply(target, &e.to_string());
                None
            }
        }
    }

    pub fn handle_command(&mut self, cmd: Command) {
        debug!("Handling {:?}", cmd);
        match cmd {
            Command::AddRepository {
                name,
                url,
                targets,
                branches,
                reply_to,
            } => self.add_repository(name, url, targets, branches, reply_to),
            Command::RemoveRepository { name, reply_to } => self.remove_repository(&name, &reply_to),
            Command::ListRepositories { reply_to } => self.list_repositories(&reply_to),
            Command::RepoLog {
                name,
                branch,
                count,
                reply_to,
            } => self.repo_log(&name, &branch, count, &reply_to),
            Command::RepoStat { name, reply_to } => {
                if let Some(handle) = self.authorized(&name, &reply_to) {
                    self.reply(&reply_to, &format!("Watched branches: {}", handle.branches().join(", ")));
                }
            }
            Command::RepoConf { name, reply_to } => {
                if let Some(handle) = self.authorized(&name, &reply_to) {
                    for (key, value) in handle.options().describe() {
                        self.reply(&reply_to, &format!("{}: {}", key, value));
                    }
                }
            }
            Command::GitConf { reply_to } => {
                for (key, value) in self.config.describe() {
                    self.reply(&reply_to, &format!("{}: {}", key, value));
                }
            }
            Command::Poll { name, force, reply_to } => self.poll(name, force, reply_to),
            Command::Snarf { text, reply_to } => self.snarf(&text, &reply_to),
        }
    }

    fn add_repository(
        &mut self,
        name: String,
        url: String,
        targets: Vec<String>,
        branches: Option<String>,
        reply_to: String,
    ) {
        if self.registry.contains(&name) || self.pending_clones.contains(&name) {
            let err = CoreError::DuplicateRepository { name };
            self.reply(&reply_to, &format!("Error: {}", err));
            return;
        }
        if self.pending_destroys.contains(&name) {
            let err = CoreError::Busy { name };
            self.reply(&reply_to, &format!("Error: {}", err));
            return;
        }

        let mut options = RepoOptions::new(url, targets);
        options.fetch_timeout_secs = self.config.fetch_timeout_secs;
        if let Some(branches) = branches {
            options = options.with_branches(branches);
        }
        let handle = RepositoryHandle::new(name.clone(), options, &self.config.repo_dir, self.vcs.clone());

        self.reply(&reply_to, &format!("Cloning of {} started...", name));
        self.pending_clones.insert(name.clone());

        let inbox = self.inbox.clone();
        tokio::task::spawn_blocking(move || {
            let result = handle.clone_mirror().map(|()| {
                for failure in handle.initialize() {
                    warn!("Initializing {}: {}", handle.name(), failure);
                }
                Arc::new(handle)
            });
            inbox.post(
                CallbackId::CloneDone(name.clone()),
                Task::CloneDone {
                    name,
                    reply_to,
                    result,
                },
            );
        });
    }

    fn remove_repository(&mut self, name: &str, reply_to: &str) {
        if self.authorized(name, reply_to).is_none() {
            return;
        }
        match self.registry.remove(name) {
            Ok(handle) => {
                self.reply(reply_to, "Repository deleted");
                self.destroy_mirror(handle);
            }
            Err(e) => self.reply(reply_to, &format!("Error: {}", e)),
        }
    }

    fn list_repositories(&self, reply_to: &str) {
        let handles: Vec<_> = self
            .registry
            .list()
            .into_iter()
            .filter(|h| h.options().is_subscribed(reply_to))
            .collect();
        if handles.is_empty() {
            self.reply(reply_to, "No repositories configured for this channel.");
            return;
        }
        for handle in handles {
            self.reply(
                reply_to,
                &format!(
                    "{}  {}  {} branch(es)",
                    handle.name(),
                    handle.options().url,
                    handle.branches().len()
                ),
            );
        }
    }

    fn repo_log(&self, name: &str, branch: &str, count: usize, reply_to: &str) {
        let Some(handle) = self.authorized(name, reply_to) else {
            return;
        };

        let commits = match handle.recent_commits(branch, count) {
            Ok(commits) => commits,
            Err(CoreError::BranchNotFound { .. }) => {
                self.reply(reply_to, &format!("No such branch being watched: {}", branch));
                self.reply(reply_to, &format!("Available branches: {}", handle.branches().join(", ")));
                return;
            }
            Err(e) => {
                self.reply(reply_to, &format!("Error: {}", e));
                return;
            }
        };

        let options = handle.options();
        let settings = DisplaySettings {
            kind: DisplayKind::RepoLog,
            repo_name: handle.name(),
            repo_url: &options.url,
            template: &options.commit_message,
            group_header: options.group_header,
            max_commits: self.config.max_commits_at_once,
        };
        let by_branch = CommitsByBranch::from([(branch.to_string(), commits)]);
        for line in render_commits(&settings, &by_branch) {
            self.reply(reply_to, &line);
        }
    }

    fn poll(&mut self, name: Option<String>, force: bool, reply_to: String) {
        if let Some(name) = &name {
            if self.authorized(name, &reply_to).is_none() {
                return;
            }
        }

        let requester = reply_to.clone();
        let trigger = if force {
            Trigger::Forced { requester, repo: name }
        } else {
            Trigger::Manual { requester, repo: name }
        };

        match self.scheduler.trigger(trigger) {
            TriggerOutcome::Started(run_id) => debug!("Manual poll started run {}", run_id),
            TriggerOutcome::Restarting => debug!("Manual poll restarts the active run"),
            TriggerOutcome::AlreadyRunning => self.reply(&reply_to, "A poll is already running."),
            TriggerOutcome::Stopped => self.reply(&reply_to, "Polling is stopped."),
        }
    }

    fn snarf(&self, text: &str, reply_to: &str) {
        let ids = find_commit_ids(text);
        if ids.is_empty() {
            return;
        }

        for handle in self.registry.list() {
            let options = handle.options();
            if !options.enable_snarf || !options.is_subscribed(reply_to) {
                continue;
            }
            let settings = DisplaySettings {
                kind: DisplayKind::Snarf,
                repo_name: handle.name(),
                repo_url: &options.url,
                template: &options.snarf_message,
                group_header: options.group_header,
                max_commits: 0,
            };

            for id in &ids {
                let Some(commit) = handle.find_commit(id) else {
                    continue;
                };
                let by_branch = CommitsByBranch::from([(String::new(), vec![commit])]);
                for line in render_commits(&settings, &by_branch) {
                    self.reply(reply_to, &line);
                }
            }
        }
    }

    /// Run a task posted by a background job
    pub fn handle_task(&mut self, id: CallbackId, task: Task) {
        debug!("Running {:?} callback", id);
        match task {
            Task::FetchDone(report) => match self.scheduler.on_fetch_done(report) {
                Completion::Notify { report, requesters } => {
                    let mut failures = report.failures;
                    failures.extend(self.announce(report.synced));

                    for requester in &requesters {
                        if failures.is_empty() {
                            self.reply(requester, "The operation succeeded.");
                        }
                        for failure in &failures {
                            self.reply(requester, &format!("Error: {}", failure));
                        }
                    }
                }
                Completion::Restarted { run_id, report } => {
                    for failure in self.announce(report.synced) {
                        debug!("Superseded run {}: {}", report.run_id, failure);
                    }
                    debug!("Waiting for run {}", run_id);
                }
                Completion::Stale => {}
            },
            Task::CloneDone {
                name,
                reply_to,
                result,
            } => {
                self.pending_clones.remove(&name);
                match result {
                    Ok(handle) => match self.registry.add(handle.clone()) {
                        Ok(()) => self.reply(&reply_to, &format!("Repository {} created and cloned", name)),
                        Err(e) => {
                            self.reply(&reply_to, &format!("Error: {}", e));
                            self.destroy_mirror(handle);
                        }
                    },
                    Err(CoreError::Clone { source, .. }) => {
                        self.reply(&reply_to, &format!("Error: Cannot clone repo: {}", source));
                    }
                    Err(e) => self.reply(&reply_to, &format!("Error: {}", e)),
                }
            }
            Task::DestroyDone { name } => {
                self.pending_destroys.remove(&name);
                debug!("Mirror of {} deleted", name);
            }
        }
    }

    /// Announce new commits of the synced repositories still tracked.
    /// A handle removed while its run was in flight is skipped, even when
    /// a repository of the same name was added since.
    fn announce(&self, synced: Vec<Arc<RepositoryHandle>>) -> Vec<CoreError> {
        let handles: Vec<_> = synced
            .into_iter()
            .filter(|h| {
                !h.is_retired()
                    && self
                        .registry
                        .get(h.name())
                        .is_ok_and(|current| Arc::ptr_eq(&current, h))
            })
            .collect();
        self.notifier.process_all(&handles)
    }

    /// Delete a mirror on the blocking pool, after any synchronize in
    /// flight. The name cannot be added again until it is gone.
    fn destroy_mirror(&mut self, handle: Arc<RepositoryHandle>) {
        let name = handle.name().to_string();
        self.pending_destroys.insert(name.clone());

        let inbox = self.inbox.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = handle.destroy() {
                warn!("Cannot delete mirror of {}: {}", handle.name(), e);
            }
            inbox.post(CallbackId::DestroyDone(name.clone()), Task::DestroyDone { name });
        });
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
