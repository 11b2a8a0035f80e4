use crate::domain::repo::RepoOptions;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration store interface
pub trait ConfigStore: Send + Sync {
    /// Load configuration from storage
    fn load(&self) -> Result<AppConfig>;

    /// Save configuration to storage
    fn save(&self, config: &AppConfig) -> Result<()>;
}

/// Persisted list of tracked repositories and their options.
///
/// Calls are synchronous and expected to be fast and local.
pub trait RepoStore: Send + Sync {
    fn load_repository_names(&self) -> Result<Vec<String>>;

    fn save_repository_names(&self, names: &[String]) -> Result<()>;

    fn load_options(&self, name: &str) -> Result<Option<RepoOptions>>;

    fn save_options(&self, name: &str, options: &RepoOptions) -> Result<()>;

    fn remove_options(&self, name: &str) -> Result<()>;
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: u32,
    /// Names of the tracked repositories
    #[serde(default)]
    pub repolist: Vec<String>,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub repos: BTreeMap<String, RepoOptions>,
}

/// Global monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Where local mirrors are kept
    pub repo_dir: PathBuf,
    /// Seconds between polls, 0 disables periodic polling
    pub poll_period_secs: u64,
    /// Most commits shown in one update
    pub max_commits_at_once: usize,
    /// Fetch timeout used by repositories that do not set one
    pub fetch_timeout_secs: u64,
    /// Bounded wait for the fetch worker on shutdown
    pub join_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            repolist: Vec::new(),
            monitor: MonitorConfig::default(),
            repos: BTreeMap::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("git_repositories"),
            poll_period_secs: 120,
            max_commits_at_once: 5,
            fetch_timeout_secs: 300,
            join_timeout_secs: 30,
        }
    }
}

impl MonitorConfig {
    /// Option name/value pairs, as shown by the gitconf command
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        vec![
            ("max_commits_at_once", self.max_commits_at_once.to_string()),
            ("poll_period_secs", self.poll_period_secs.to_string()),
            ("repo_dir", self.repo_dir.display().to_string()),
            ("fetch_timeout_secs", self.fetch_timeout_secs.to_string()),
        ]
    }
}
