// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry point – "turn the key and go".
//!
//! The [`GatehouseLoader`] stacks configuration providers, resolves
//! them into the immutable [`Options`], wires the provider, session
//! store and loader chain into an [`AuthProxy`] and hands back a
//! [`Gatehouse`] ready to `start()`.  Every configuration problem
//! surfaces here, before a single request is accepted.

#[cfg(test)]
mod tests;

use std::env;
use std::sync::Arc;

use log::LevelFilter;
use thiserror::Error;

use crate::auth::jwt::BearerIssuer;
use crate::config::{Config, ConfigError, ConfigProvider, EnvConfigProvider, FileConfigProvider};
use crate::core::ProxyError;
use crate::logging::{self, LoggingConfig};
use crate::options::Options;
use crate::provider::{OidcProvider, Provider};
use crate::proxy::AuthProxy;
use crate::server::{ProxyServer, ServerConfig};
use crate::session::{CookieSessionStore, MemorySessionStore, SessionStore};
use crate::info_fmt;

/// Errors that can occur during initialization.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("proxy error: {0}")]
    ProxyError(#[from] ProxyError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Builder for a [`Gatehouse`] instance.
#[derive(Debug, Default)]
pub struct GatehouseLoader {
    config: Option<Config>,
    config_file_path: Option<String>,
    use_env_vars: bool,
    env_prefix: Option<String>,
    extra_providers: Vec<Arc<dyn ConfigProvider>>,
}

impl GatehouseLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an already-assembled configuration, bypassing file and env
    /// loading entirely.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load a configuration file (JSON/TOML/YAML by extension).
    pub fn with_config_file(mut self, file_path: &str) -> Self {
        self.config_file_path = Some(file_path.to_string());
        self
    }

    /// Overlay `GATEHOUSE_*` environment variables.
    pub fn with_env_vars(mut self) -> Self {
        self.use_env_vars = true;
        self
    }

    /// Overlay environment variables with a custom prefix.
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.use_env_vars = true;
        self
    }

    /// Add a custom configuration provider, overriding file and env
    /// values.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.extra_providers.push(Arc::new(provider));
        self
    }

    /// Resolve configuration and build the proxy.
    pub fn build(self) -> Result<Gatehouse, LoaderError> {
        let config = match self.config {
            Some(config) => config,
            None => {
                let mut builder = Config::builder();
                if let Some(file_path) = &self.config_file_path {
                    builder = builder.with_provider(FileConfigProvider::new(file_path)?);
                }
                if self.use_env_vars {
                    let env_provider = match &self.env_prefix {
                        Some(prefix) => EnvConfigProvider::new(prefix),
                        None => EnvConfigProvider::default(),
                    };
                    builder = builder.with_provider(env_provider);
                }
                for provider in self.extra_providers {
                    builder = builder.with_shared_provider(provider);
                }
                builder.build()
            }
        };

        // Logging first, so option validation failures are visible.
        let log_level = match env::var("RUST_LOG_LEVEL").ok().as_deref() {
            Some("trace") => LevelFilter::Trace,
            Some("debug") => LevelFilter::Debug,
            Some("warn") => LevelFilter::Warn,
            Some("error") => LevelFilter::Error,
            _ => LevelFilter::Info,
        };
        let logging_config: LoggingConfig =
            config.get_or_default("proxy.logging", LoggingConfig::default())?;
        logging::init_with_config(Some(log_level), logging_config);

        info_fmt!("Loader", "gatehouse starting up");

        let options = Arc::new(Options::from_config(&config)?);

        let provider_config = options.provider.clone().ok_or_else(|| {
            LoaderError::Other("`proxy.provider` is required".to_string())
        })?;
        let oidc = Arc::new(OidcProvider::new(provider_config)?);

        // The provider's own issuer backs the bearer loader, with the
        // provider as materializer; extra issuers are wired inside
        // AuthProxy::new.
        let mut bearer_issuers = Vec::new();
        if options.skip_jwt_bearer_tokens {
            if let Some(verifier) = oidc.verifier() {
                info_fmt!(
                    "Loader",
                    "accepting JWT bearer tokens from issuer: {}",
                    verifier.issuer()
                );
                bearer_issuers.push(BearerIssuer {
                    verifier,
                    provider: Some(oidc.clone() as Arc<dyn Provider>),
                });
            }
        }
        let provider: Arc<dyn Provider> = oidc;

        let session_store: Arc<dyn SessionStore> = match options.session_store.as_str() {
            "memory" => Arc::new(MemorySessionStore::new(options.cookie.clone())),
            _ => Arc::new(CookieSessionStore::new(options.cookie.clone())?),
        };

        let proxy = AuthProxy::new(
            options.clone(),
            provider,
            session_store,
            bearer_issuers,
        )?;

        let server_config: ServerConfig =
            config.get_or_default("server", ServerConfig::default())?;
        let server = ProxyServer::new(server_config, Arc::new(proxy));

        Ok(Gatehouse {
            config: Arc::new(config),
            options,
            server,
        })
    }
}

/// A fully wired proxy, ready to serve.
#[derive(Debug, Clone)]
pub struct Gatehouse {
    config: Arc<Config>,
    options: Arc<Options>,
    server: ProxyServer,
}

impl Gatehouse {
    pub fn loader() -> GatehouseLoader {
        GatehouseLoader::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Serve until interrupted.
    pub async fn start(&self) -> Result<(), LoaderError> {
        self.server.start().await.map_err(LoaderError::ProxyError)
    }
}
