use thiserror::Error;

use crate::ports::{DeliveryError, VcsError};

/// Core domain errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Repository already exists: {name}")]
    DuplicateRepository { name: String },

    #[error("No repository named {name}")]
    RepositoryNotFound { name: String },

    #[error("No such branch being watched in {repo}: {branch}")]
    BranchNotFound { repo: String, branch: String },

    #[error("Cannot clone {name}: {source}")]
    Clone { name: String, source: VcsError },

    #[error("Sync of {repo}/{branch} failed: {source}")]
    Sync {
        repo: String,
        branch: String,
        source: VcsError,
    },

    #[error("Repository {name} is busy, try again later")]
    Busy { name: String },

    #[error("Timeout while fetching {repo}/{branch}")]
    Timeout { repo: String, branch: String },

    #[error("Delivery to {target} failed: {source}")]
    Delivery {
        target: String,
        source: DeliveryError,
    },

    #[error("Store error: {source}")]
    Store { source: anyhow::Error },
}

impl CoreError {
    /// Classify a failed VCS call on a branch as a timeout or a sync error.
    pub fn from_branch_failure(repo: &str, branch: &str, err: VcsError) -> Self {
        match err {
            VcsError::Timeout { .. } => CoreError::Timeout {
                repo: repo.to_string(),
                branch: branch.to_string(),
            },
            other => CoreError::Sync {
                repo: repo.to_string(),
                branch: branch.to_string(),
                source: other,
            },
        }
    }

    pub fn store(source: anyhow::Error) -> Self {
        CoreError::Store { source }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
