//! Work handed back to the command context by background jobs.
//!
//! Background threads never touch notification state directly; they post
//! a task here and the monitor loop runs it. Posting a task under an id
//! that still has a pending task replaces (revokes) the older one.

use gitwatch_core::CoreError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use super::fetcher::FetchReport;
use super::handle::RepositoryHandle;

/// Stable identity of a pending task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallbackId {
    FetchDone,
    CloneDone(String),
    DestroyDone(String),
}

#[derive(Debug)]
pub enum Task {
    /// A fetch run finished, normally or cancelled
    FetchDone(FetchReport),
    /// An added repository finished cloning
    CloneDone {
        name: String,
        reply_to: String,
        result: Result<Arc<RepositoryHandle>, CoreError>,
    },
    /// The mirror of a removed repository is gone
    DestroyDone { name: String },
}

type Pending = Arc<Mutex<HashMap<CallbackId, Task>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<CallbackId, Task>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Posting side, cheap to clone into worker threads
#[derive(Clone)]
pub struct Inbox {
    pending: Pending,
    wake: mpsc::UnboundedSender<CallbackId>,
}

/// Consuming side, owned by the monitor loop
pub struct InboxReceiver {
    pending: Pending,
    wake: mpsc::UnboundedReceiver<CallbackId>,
}

pub fn inbox() -> (Inbox, InboxReceiver) {
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Inbox {
            pending: pending.clone(),
            wake: tx,
        },
        InboxReceiver { pending, wake: rx },
    )
}

impl Inbox {
    /// Schedule `task` to run on the command context
    pub fn post(&self, id: CallbackId, task: Task) {
        if lock(&self.pending).insert(id.clone(), task).is_some() {
            debug!("Revoked pending {:?} callback", id);
        }
        if self.wake.send(id).is_err() {
            debug!("Inbox closed, dropping task");
        }
    }
}

impl InboxReceiver {
    /// Next pending task, `None` once every `Inbox` is gone
    pub async fn recv(&mut self) -> Option<(CallbackId, Task)> {
        loop {
            let id = self.wake.recv().await?;
            // a revoked task leaves a wake-up with nothing behind it
            if let Some(task) = lock(&self.pending).remove(&id) {
                return Some((id, task));
            }
        }
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }
}
