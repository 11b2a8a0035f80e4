use gitwatch_core::domain::RepoOptions;
use gitwatch_core::ports::RepoStore;
use gitwatch_core::{CoreError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use super::handle::RepositoryHandle;

/// The set of tracked repositories, keyed by name.
///
/// Membership changes and the persisted name list are updated inside the
/// same critical section, so readers never see them disagree. The lock
/// only guards membership; handles carry their own locks.
pub struct RepositoryRegistry {
    repos: Mutex<BTreeMap<String, Arc<RepositoryHandle>>>,
    store: Arc<dyn RepoStore>,
}

impl RepositoryRegistry {
    pub fn new(store: Arc<dyn RepoStore>) -> Self {
        Self {
            repos: Mutex::new(BTreeMap::new()),
            store,
        }
    }

    /// Rebuild the registry from the persisted name list.
    ///
    /// Names without stored options are dropped and the list is saved
    /// back, keeping membership and store in step.
    pub fn restore<F>(store: Arc<dyn RepoStore>, make_handle: F) -> Result<Self>
    where
        F: Fn(&str, RepoOptions) -> RepositoryHandle,
    {
        let names = store.load_repository_names().map_err(CoreError::store)?;
        let registry = Self::new(store);

        {
            let mut repos = registry.lock();
            for name in &names {
                match registry.store.load_options(name).map_err(CoreError::store)? {
                    Some(options) => {
                        repos.insert(name.clone(), Arc::new(make_handle(name, options)));
                    }
                    None => warn!("No options stored for {}, dropping it", name),
                }
            }

            if repos.len() != names.len() {
                let kept: Vec<String> = repos.keys().cloned().collect();
                registry
                    .store
                    .save_repository_names(&kept)
                    .map_err(CoreError::store)?;
            }
            info!("Restored {} repositories", repos.len());
        }

        Ok(registry)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<RepositoryHandle>>> {
        self.repos.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a handle and persist it
    pub fn add(&self, handle: Arc<RepositoryHandle>) -> Result<()> {
        let mut repos = self.lock();
        let name = handle.name().to_string();
        if repos.contains_key(&name) {
            return Err(CoreError::DuplicateRepository { name });
        }

        self.store
            .save_options(&name, handle.options())
            .map_err(CoreError::store)?;
        repos.insert(name.clone(), handle);

        let names: Vec<String> = repos.keys().cloned().collect();
        if let Err(e) = self.store.save_repository_names(&names) {
            repos.remove(&name);
            if let Err(cleanup) = self.store.remove_options(&name) {
                warn!("Cannot drop options of {}: {}", name, cleanup);
            }
            return Err(CoreError::store(e));
        }

        info!("Added repository {}", name);
        Ok(())
    }

    /// Remove a handle and forget it in the store
    pub fn remove(&self, name: &str) -> Result<Arc<RepositoryHandle>> {
        let mut repos = self.lock();
        let handle = repos
            .remove(name)
            .ok_or_else(|| CoreError::RepositoryNotFound {
                name: name.to_string(),
            })?;

        let names: Vec<String> = repos.keys().cloned().collect();
        if let Err(e) = self.store.save_repository_names(&names) {
            repos.insert(name.to_string(), handle);
            return Err(CoreError::store(e));
        }
        if let Err(e) = self.store.remove_options(name) {
            warn!("Cannot drop options of {}: {}", name, e);
        }

        info!("Removed repository {}", name);
        Ok(handle)
    }

    /// Snapshot of the current handles, sorted by name
    pub fn list(&self) -> Vec<Arc<RepositoryHandle>> {
        self.lock().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<RepositoryHandle>> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::RepositoryNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}
