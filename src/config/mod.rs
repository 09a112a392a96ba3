// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration subsystem.
//!
//! A running proxy is created from an ordered list of
//! [`ConfigProvider`]s; later providers override earlier ones.  Typical
//! stacking order:
//!
//! 1. `FileConfigProvider` – `gatehouse.{toml,json,yaml}`
//! 2. `EnvConfigProvider`  – `GATEHOUSE_PROXY__COOKIE__NAME=…`
//! 3. *your* provider implementing [`ConfigProvider`]
//!
//! [`Config::get`] is deterministic: the highest-priority provider that
//! has the key wins.  The whole tree is resolved once at startup into
//! an immutable [`crate::options::Options`]; nothing re-reads
//! configuration at request time.

mod env;
pub mod error;
mod file;

#[cfg(test)]
mod tests;

pub use env::EnvConfigProvider;
pub use error::ConfigError;
pub use file::FileConfigProvider;

use std::fmt::Debug;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A source of configuration values.  Object-safe; typed access lives
/// on [`ConfigProviderExt`].
pub trait ConfigProvider: Debug + Send + Sync {
    /// Does this provider carry a value for `key`?
    fn has(&self, key: &str) -> bool;

    /// Provider name for diagnostics.
    fn provider_name(&self) -> &str;

    /// Raw JSON value for a dot-separated key path.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError>;
}

/// Typed access on top of any [`ConfigProvider`].
pub trait ConfigProviderExt: ConfigProvider {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                ConfigError::ParseError(format!("failed to deserialize '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}

/// Builder for the provider chain.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider.  Later additions take priority.
    pub fn with_provider<P: ConfigProvider + 'static>(self, provider: P) -> Self {
        self.with_shared_provider(Arc::new(provider))
    }

    /// Add an already-shared provider.
    pub fn with_shared_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Config {
        Config {
            providers: self.providers,
        }
    }
}

/// The resolved provider chain.
#[derive(Debug, Clone, Default)]
pub struct Config {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        // Highest-priority provider wins: walk the chain back to front.
        for provider in self.providers.iter().rev() {
            if provider.has(key) {
                return provider.get_raw(key);
            }
        }
        Ok(None)
    }

    /// Typed lookup across the whole chain.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                ConfigError::ParseError(format!("failed to deserialize '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }

    /// Typed lookup with a fallback.
    pub fn get_or_default<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn has(&self, key: &str) -> bool {
        self.providers.iter().any(|p| p.has(key))
    }
}
