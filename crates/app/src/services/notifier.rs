use gitwatch_core::app::{render_commits, DisplayKind, DisplaySettings};
use gitwatch_core::domain::CommitsByBranch;
use gitwatch_core::ports::OutputSink;
use gitwatch_core::{CoreError, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::handle::RepositoryHandle;

/// Announces new commits and moves cursors past what was announced.
///
/// Cursors only advance once every line reached every target, so a
/// delivery failure means the same commits are offered again next cycle.
pub struct Notifier {
    sink: Arc<dyn OutputSink>,
    max_commits: usize,
}

impl Notifier {
    pub fn new(sink: Arc<dyn OutputSink>, max_commits: usize) -> Self {
        Self { sink, max_commits }
    }

    /// Announce the new commits of one repository.
    /// Returns the number of commits announced.
    pub fn process_repository(&self, handle: &RepositoryHandle) -> Result<usize> {
        let targets: Vec<&str> = handle
            .targets()
            .iter()
            .map(String::as_str)
            .filter(|target| self.sink.accepts(target))
            .collect();
        if targets.is_empty() {
            debug!("No reachable target for {}, skipping", handle.name());
            return Ok(0);
        }

        let deltas = handle.new_commits_per_branch()?;

        let commits: CommitsByBranch = deltas
            .iter()
            .filter(|(_, delta)| !delta.commits.is_empty())
            .map(|(branch, delta)| (branch.clone(), delta.commits.clone()))
            .collect();
        let count: usize = commits.values().map(Vec::len).sum();

        if count > 0 {
            let options = handle.options();
            let settings = DisplaySettings {
                kind: DisplayKind::Commits,
                repo_name: handle.name(),
                repo_url: &options.url,
                template: &options.commit_message,
                group_header: options.group_header,
                max_commits: self.max_commits,
            };
            let lines = render_commits(&settings, &commits);

            for target in &targets {
                for line in &lines {
                    self.sink.send(target, line).map_err(|source| CoreError::Delivery {
                        target: target.to_string(),
                        source,
                    })?;
                }
            }
            info!("Announced {} commits of {} to {} targets", count, handle.name(), targets.len());
        }

        for (branch, delta) in &deltas {
            if handle.cursor(branch).as_deref() != Some(delta.tip.as_str()) {
                handle.advance_cursor(branch, &delta.tip)?;
            }
        }

        Ok(count)
    }

    /// Process every handle; one repository failing does not stop the others
    pub fn process_all(&self, handles: &[Arc<RepositoryHandle>]) -> Vec<CoreError> {
        let mut failures = Vec::new();
        for handle in handles {
            if let Err(e) = self.process_repository(handle) {
                match e {
                    CoreError::Delivery { .. } => warn!("Notification for {} not delivered: {}", handle.name(), e),
                    _ => error!("Cannot process {}: {}", handle.name(), e),
                }
                failures.push(e);
            }
        }
        failures
    }
}
