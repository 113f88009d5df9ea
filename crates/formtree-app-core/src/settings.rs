// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tunables for the optimistic mutation engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigService, ConfigStore};

/// Config key the settings are stored under.
pub const SETTINGS_KEY: &str = "engine";

/// How many requests per form may be outstanding at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// One request per form at a time, in issuance order.
    #[default]
    SerializePerForm,
    /// Send as soon as every referenced id is confirmed.
    Concurrent,
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Dispatch policy for operations on the same form.
    pub dispatch: DispatchPolicy,
    /// Per-request limit in milliseconds; `None` waits forever.
    pub remote_timeout_ms: Option<u64>,
    /// Journal length above which the engine logs a warning.
    pub max_journal_len: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            dispatch: DispatchPolicy::default(),
            remote_timeout_ms: Some(30_000),
            max_journal_len: 256,
        }
    }
}

impl EngineSettings {
    /// Request limit as a [`Duration`].
    pub fn remote_timeout(&self) -> Option<Duration> {
        self.remote_timeout_ms.map(Duration::from_millis)
    }

    /// Load from `service`, falling back to defaults when nothing is stored.
    pub fn load<S: ConfigStore>(service: &ConfigService<S>) -> Result<Self, ConfigError> {
        service.load_or_default(SETTINGS_KEY)
    }

    /// Persist through `service`.
    pub fn save<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<(), ConfigError> {
        service.save(SETTINGS_KEY, self)
    }
}
