use anyhow::{Context, Result};
use directories::ProjectDirs;
use gitwatch_core::domain::RepoOptions;
use gitwatch_core::ports::{AppConfig, ConfigStore, RepoStore};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// File-based store that keeps the configuration, the repository list and
/// the per-repository options in one TOML file.
pub struct FileConfigStore {
    config_path: PathBuf,
    // serializes read-modify-write cycles on the file
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new() -> Result<Self> {
        let config_path = Self::get_default_config_path()?;
        Ok(Self::with_path(config_path))
    }

    pub fn with_path<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn get_default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "gitwatch")
            .context("Failed to determine project directories")?;

        let config_dir = proj_dirs.config_dir();
        Ok(config_dir.join("gitwatch.toml"))
    }

    /// Create default config if it doesn't exist
    fn ensure_config_exists(&self) -> Result<()> {
        if !self.config_path.exists() {
            if let Some(parent) = self.config_path.parent() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
            self.write(&AppConfig::default())?;
        }
        Ok(())
    }

    fn read(&self) -> Result<AppConfig> {
        self.ensure_config_exists()?;

        let contents = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file: {}", self.config_path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", self.config_path.display()))
    }

    fn write(&self, config: &AppConfig) -> Result<()> {
        let contents = toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;

        fs::write(&self.config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", self.config_path.display()))
    }

    fn update(&self, change: impl FnOnce(&mut AppConfig)) -> Result<()> {
        let _guard = self.guard();
        let mut config = self.read()?;
        change(&mut config);
        self.write(&config)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<AppConfig> {
        let _guard = self.guard();
        self.read()
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        let _guard = self.guard();
        self.write(config)
    }
}

impl RepoStore for FileConfigStore {
    fn load_repository_names(&self) -> Result<Vec<String>> {
        Ok(self.load()?.repolist)
    }

    fn save_repository_names(&self, names: &[String]) -> Result<()> {
        self.update(|config| config.repolist = names.to_vec())
    }

    fn load_options(&self, name: &str) -> Result<Option<RepoOptions>> {
        Ok(self.load()?.repos.remove(name))
    }

    fn save_options(&self, name: &str, options: &RepoOptions) -> Result<()> {
        self.update(|config| {
            config.repos.insert(name.to_string(), options.clone());
        })
    }

    fn remove_options(&self, name: &str) -> Result<()> {
        self.update(|config| {
            config.repos.remove(name);
        })
    }
}

/// In-memory repository store, for ephemeral monitors and tests
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    names: Vec<String>,
    options: BTreeMap<String, RepoOptions>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RepoStore for MemoryStore {
    fn load_repository_names(&self) -> Result<Vec<String>> {
        Ok(self.state().names.clone())
    }

    fn save_repository_names(&self, names: &[String]) -> Result<()> {
        self.state().names = names.to_vec();
        Ok(())
    }

    fn load_options(&self, name: &str) -> Result<Option<RepoOptions>> {
        Ok(self.state().options.get(name).cloned())
    }

    fn save_options(&self, name: &str, options: &RepoOptions) -> Result<()> {
        self.state().options.insert(name.to_string(), options.clone());
        Ok(())
    }

    fn remove_options(&self, name: &str) -> Result<()> {
        self.state().options.remove(name);
        Ok(())
    }
}
