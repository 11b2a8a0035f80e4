use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::fetcher::{FetchReport, FetchWorker};
use super::handle::RepositoryHandle;
use super::inbox::{CallbackId, Inbox, Task};
use super::registry::RepositoryRegistry;

/// What asked for a fetch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The periodic timer fired
    Tick,
    /// A user asked for a poll; refused while a run is active
    Manual {
        requester: String,
        /// Limit the run to one repository
        repo: Option<String>,
    },
    /// An administrator asked for a poll; restarts an active run
    Forced { requester: String, repo: Option<String> },
}

impl Trigger {
    fn split(self) -> (Option<String>, Option<String>) {
        match self {
            Trigger::Tick => (None, None),
            Trigger::Manual { requester, repo } | Trigger::Forced { requester, repo } => {
                (Some(requester), repo)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started(u64),
    /// The active run was asked to stop; a fresh one follows its completion
    Restarting,
    AlreadyRunning,
    Stopped,
}

/// What the monitor should do with a finished run
#[derive(Debug)]
pub enum Completion {
    /// Announce new commits of the run's repositories
    Notify {
        report: FetchReport,
        requesters: Vec<String>,
    },
    /// The run was superseded and a new one started in its place.
    /// The repositories it synced before stopping still get announced.
    Restarted { run_id: u64, report: FetchReport },
    /// Report of a run that is no longer tracked
    Stale,
}

struct ActiveRun {
    id: u64,
    cancel: Arc<AtomicBool>,
    worker: JoinHandle<()>,
    /// Targets waiting for the outcome of a manual poll
    requesters: Vec<String>,
    /// Repository the run is limited to, `None` for all of them
    scope: Option<String>,
    restart: bool,
}

enum SchedulerState {
    Idle,
    Running(ActiveRun),
}

/// Decides when fetch runs start and keeps at most one of them active.
///
/// A tick while a run is active stops that run and starts a fresh one
/// over the latest registry snapshot once the old run has reported back.
/// The fresh run visits the repositories the old one did not reach first,
/// so every repository keeps getting synced even when runs take longer
/// than the poll period. Runs never overlap.
pub struct PollScheduler {
    registry: Arc<RepositoryRegistry>,
    inbox: Inbox,
    poll_period: Option<Duration>,
    join_timeout: Duration,
    state: SchedulerState,
    next_run_id: u64,
    stopped: bool,
}

impl PollScheduler {
    /// `poll_period` of zero disables the timer
    pub fn new(
        registry: Arc<RepositoryRegistry>,
        inbox: Inbox,
        poll_period: Duration,
        join_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            inbox,
            poll_period: (!poll_period.is_zero()).then_some(poll_period),
            join_timeout,
            state: SchedulerState::Idle,
            next_run_id: 1,
            stopped: false,
        }
    }

    /// The periodic timer, `None` when polling is disabled.
    /// Its first tick fires immediately.
    pub fn ticker(&self) -> Option<Interval> {
        if self.stopped {
            return None;
        }
        let period = self.poll_period?;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(interval)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SchedulerState::Running(_))
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn trigger(&mut self, trigger: Trigger) -> TriggerOutcome {
        if self.stopped {
            debug!("Ignoring {:?}, scheduler stopped", trigger);
            return TriggerOutcome::Stopped;
        }

        let run = match &mut self.state {
            SchedulerState::Idle => {
                let (requester, scope) = trigger.split();
                let id = self.start_run(requester.into_iter().collect(), scope, &[]);
                return TriggerOutcome::Started(id);
            }
            SchedulerState::Running(run) => run,
        };

        if let Trigger::Manual { requester, .. } = &trigger {
            info!("Poll requested by {} while run {} active", requester, run.id);
            return TriggerOutcome::AlreadyRunning;
        }

        if !run.restart {
            warn!("Fetch run {} still active, restarting it", run.id);
        }
        run.cancel.store(true, Ordering::SeqCst);
        let (requester, scope) = trigger.split();
        // the restarted run covers both scopes
        if run.scope != scope {
            run.scope = None;
        }
        run.restart = true;
        run.requesters.extend(requester);
        TriggerOutcome::Restarting
    }

    /// Start a run over the registry snapshot, limited to `scope` when set.
    /// Repositories in `visited` go last.
    fn start_run(
        &mut self,
        requesters: Vec<String>,
        scope: Option<String>,
        visited: &[Arc<RepositoryHandle>],
    ) -> u64 {
        let id = self.next_run_id;
        self.next_run_id += 1;

        let (mut handles, done): (Vec<_>, Vec<_>) = self
            .registry
            .list()
            .into_iter()
            .filter(|h| scope.as_deref().map_or(true, |name| h.name() == name))
            .partition(|h| !visited.iter().any(|v| Arc::ptr_eq(v, h)));
        handles.extend(done);
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = cancel.clone();
        let inbox = self.inbox.clone();

        let worker = tokio::task::spawn_blocking(move || {
            FetchWorker::new(id, handles, worker_cancel)
                .run(|report| inbox.post(CallbackId::FetchDone, Task::FetchDone(report)));
        });

        self.state = SchedulerState::Running(ActiveRun {
            id,
            cancel,
            worker,
            requesters,
            scope,
            restart: false,
        });
        id
    }

    /// Account for a finished run
    pub fn on_fetch_done(&mut self, report: FetchReport) -> Completion {
        match std::mem::replace(&mut self.state, SchedulerState::Idle) {
            SchedulerState::Running(run) if run.id == report.run_id => {
                if run.restart && !self.stopped {
                    let run_id = self.start_run(run.requesters, run.scope, &report.synced);
                    info!(
                        "Fetch run {} superseded by run {} after {} repositories",
                        report.run_id,
                        run_id,
                        report.synced.len()
                    );
                    return Completion::Restarted { run_id, report };
                }
                info!(
                    "Fetch run {} done in {:?} with {} failures",
                    report.run_id,
                    report.elapsed,
                    report.failures.len()
                );
                Completion::Notify {
                    report,
                    requesters: run.requesters,
                }
            }
            other => {
                self.state = other;
                debug!("Ignoring report of untracked run {}", report.run_id);
                Completion::Stale
            }
        }
    }

    /// Cancel the active run, wait a bounded time for it and disable the
    /// timer. Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let SchedulerState::Running(run) = std::mem::replace(&mut self.state, SchedulerState::Idle) {
            run.cancel.store(true, Ordering::SeqCst);
            match tokio::time::timeout(self.join_timeout, run.worker).await {
                Ok(Ok(())) => info!("Fetch run {} stopped", run.id),
                Ok(Err(e)) => error!("Fetch run {} failed: {}", run.id, e),
                Err(_) => warn!(
                    "Fetch run {} still busy after {:?}, leaving it behind",
                    run.id, self.join_timeout
                ),
            }
        }
        info!("Poll scheduler stopped");
    }
}
