// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persistence port for engine settings.
//!
//! A [`ConfigStore`] moves opaque bytes under a short key. [`ConfigService`]
//! owns the encoding, which is pretty-printed JSON.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Byte storage addressed by key (`engine`, ...).
pub trait ConfigStore {
    /// Bytes stored under `key`, or [`ConfigError::NotFound`].
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replace whatever is stored under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Why a settings load or save failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing stored under the key.
    #[error("no config stored under this key")]
    NotFound,
    /// Key a store cannot map to a location.
    #[error("invalid config key {0:?}")]
    InvalidKey(String),
    /// The platform has no per-user config directory.
    #[error("no per-user config directory on this platform")]
    NoConfigDir,
    /// Backing store refused the request.
    #[error("config store unavailable: {0}")]
    Unavailable(String),
    /// Filesystem failure.
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes are not valid JSON for the requested type.
    #[error("malformed config: {0}")]
    Serde(#[from] serde_json::Error),
}

/// JSON codec in front of a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Wrap `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// The wrapped store.
    pub const fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// Decode the value under `key`; a missing key and an empty blob are both `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        let bytes = match self.store.load_raw(key) {
            Err(ConfigError::NotFound) => return Ok(None),
            other => other?,
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// [`load`](Self::load), with `T::default()` standing in for `None`.
    pub fn load_or_default<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        self.load(key).map(Option::unwrap_or_default)
    }

    /// Encode `value` and store it under `key`.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        self.store.save_raw(key, &serde_json::to_vec_pretty(value)?)
    }
}
