use gitwatch_core::ports::VcsError;
use gitwatch_core::CoreError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::handle::RepositoryHandle;

/// Outcome of one fetch run
#[derive(Debug)]
pub struct FetchReport {
    pub run_id: u64,
    /// The snapshot the run was started with
    pub handles: Vec<Arc<RepositoryHandle>>,
    /// Repositories whose synchronize finished, in run order
    pub synced: Vec<Arc<RepositoryHandle>>,
    pub failures: Vec<CoreError>,
    /// The run stopped early on request
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// One-shot job bringing a snapshot of mirrors up to date.
///
/// Repositories are synchronized one after the other. The cancel flag is
/// checked before each repository; a synchronize already in progress runs
/// to completion (bounded by the repository's fetch timeout).
pub struct FetchWorker {
    run_id: u64,
    handles: Vec<Arc<RepositoryHandle>>,
    cancel: Arc<AtomicBool>,
    started: Instant,
}

impl FetchWorker {
    pub fn new(run_id: u64, handles: Vec<Arc<RepositoryHandle>>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            run_id,
            handles,
            cancel,
            started: Instant::now(),
        }
    }

    /// Run to completion and hand the report to `on_complete`, exactly once
    pub fn run<F>(self, on_complete: F)
    where
        F: FnOnce(FetchReport),
    {
        info!("Fetch run {} started over {} repositories", self.run_id, self.handles.len());
        let mut failures = Vec::new();
        let mut synced = Vec::with_capacity(self.handles.len());
        let mut cancelled = false;

        for handle in &self.handles {
            if self.cancel.load(Ordering::SeqCst) {
                info!("Fetch run {} cancelled before {}", self.run_id, handle.name());
                cancelled = true;
                break;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| handle.synchronize())) {
                Ok(errors) => failures.extend(errors),
                Err(_) => {
                    error!("Synchronize of {} panicked", handle.name());
                    failures.push(CoreError::Sync {
                        repo: handle.name().to_string(),
                        branch: "*".to_string(),
                        source: VcsError::Other("synchronize panicked".to_string()),
                    });
                }
            }
            synced.push(handle.clone());
        }

        let elapsed = self.started.elapsed();
        debug!("Exiting fetch run {}, elapsed: {:?}", self.run_id, elapsed);
        on_complete(FetchReport {
            run_id: self.run_id,
            handles: self.handles,
            synced,
            failures,
            cancelled,
            elapsed,
        });
    }
}
