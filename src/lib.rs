// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Gatehouse – an authenticating reverse proxy.
//!
//! Gatehouse sits between unauthenticated clients and an upstream HTTP
//! application.  Every request is either recognized (cookie session,
//! Basic credentials against an htpasswd file, or a bearer JWT from a
//! trusted issuer) or driven through a browser OAuth2/OIDC
//! authorization-code flow; authenticated requests are forwarded with
//! a configurable set of identity headers attached.
//!
//! # Core pieces
//!
//! - **Session loader chain** – JWT → Basic → stored session, each
//!   loader populating a per-request scope ([`auth`]).
//! - **Authorization-code flow** – `/start` issues a CSRF nonce bound
//!   to the provider `state`, `/callback` verifies it, redeems the
//!   code and mints the session ([`proxy`]).
//! - **Open-redirect defense** – every post-auth destination passes
//!   [`proxy::redirect::is_valid_redirect`].
//! - **Header projection** – identity headers are set from the session
//!   or removed, never inherited from the client
//!   ([`proxy::headers`]).
//!
//! # Initialization
//!
//! ```rust,no_run
//! use gatehouse::Gatehouse;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gatehouse = Gatehouse::loader()
//!         .with_config_file("gatehouse.toml")
//!         .with_env_vars()
//!         .build()?;
//!
//!     gatehouse.start().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Configuration is layered: files (JSON/TOML/YAML) overlaid by
//! `GATEHOUSE_*` environment variables, resolved once at startup into
//! an immutable [`Options`] record.  A minimal TOML configuration:
//!
//! ```toml
//! [server]
//! port = 4180
//!
//! [proxy]
//! upstream = "http://127.0.0.1:3000"
//! email_domains = ["example.com"]
//!
//! [proxy.cookie]
//! secret = "<32 bytes, hex or base64>"
//!
//! [proxy.provider]
//! client_id = "..."
//! client_secret = "..."
//! auth_url = "https://idp.example.com/authorize"
//! token_url = "https://idp.example.com/token"
//! ```
//!
//! # Extension points
//!
//! The collaborators are traits: implement [`Provider`] for another
//! identity provider, [`SessionStore`] for another session backend,
//! or [`ConfigProvider`] for another configuration source, and wire
//! them up through [`AuthProxy::new`].

// Module declarations
pub mod auth;
pub mod config;
pub mod cookies;
pub mod core;
pub mod loader;
pub mod logging;
pub mod options;
pub mod provider;
pub mod proxy;
pub mod server;
pub mod session;
pub mod upstream;

// Re-export key types at the crate root for convenience
pub use config::{Config, ConfigError, ConfigProvider, ConfigProviderExt};
pub use core::{HttpMethod, ProxyError, ProxyRequest, ProxyResponse, RequestScope};
pub use loader::{Gatehouse, GatehouseLoader, LoaderError};
pub use options::Options;
pub use provider::{Provider, ProviderError};
pub use proxy::AuthProxy;
pub use server::{ProxyServer, ServerConfig};
pub use session::{SessionState, SessionStore};
