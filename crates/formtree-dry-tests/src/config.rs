// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use formtree_app_core::config::{ConfigError, ConfigStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory implementation of [`ConfigStore`] for engine-settings tests.
///
/// Clones share state, so a test can hand one clone to a
/// [`ConfigService`](formtree_app_core::config::ConfigService) and inspect the
/// other.
///
/// # Example
///
/// ```
/// use formtree_app_core::config::ConfigService;
/// use formtree_app_core::settings::{DispatchPolicy, EngineSettings};
/// use formtree_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// let settings = EngineSettings {
///     dispatch: DispatchPolicy::Concurrent,
///     ..EngineSettings::default()
/// };
/// settings.save(&service).unwrap();
/// assert!(store.contains_key("engine"));
/// assert_eq!(EngineSettings::load(&service).unwrap(), settings);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Vec<u8>>,
    saves: usize,
    fail_on_load: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with one raw entry.
    pub fn with_entry(key: &str, raw: &[u8]) -> Self {
        let store = Self::new();
        store.lock().data.insert(key.to_owned(), raw.to_vec());
        store
    }

    /// Make every load fail with [`ConfigError::Unavailable`].
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Number of `save_raw` calls so far.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    /// Check if a key exists in the store.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let inner = self.lock();
        if inner.fail_on_load {
            return Err(ConfigError::Unavailable("simulated load failure".into()));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.saves += 1;
        inner.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}
