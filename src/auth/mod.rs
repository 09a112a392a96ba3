// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session resolution – the loader chain.
//!
//! Each request walks an ordered chain of [`SessionLoader`]s (JWT bearer
//! → basic credentials → stored cookie session); the first loader that
//! produces a session wins and later ones never run.  A loader that
//! cannot authenticate the request leaves the scope empty rather than
//! failing it – unauthenticated requests are a normal outcome here and
//! the handlers decide what to do about them.
//!
//! Loaders communicate with the browser only by appending `Set-Cookie`
//! headers onto the response being assembled (session refresh, cookie
//! clearing), never by writing a response themselves.

pub mod basic;
pub mod htpasswd;
pub mod jwt;
pub mod stored;


pub use basic::BasicAuthSessionLoader;
pub use htpasswd::HtpasswdValidator;
pub use jwt::JwtSessionLoader;
pub use stored::StoredSessionLoader;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use crate::core::{ProxyError, ProxyRequest};
use crate::session::SessionState;
use crate::trace_fmt;

/// One way of turning request credentials into a session.
#[async_trait]
pub trait SessionLoader: fmt::Debug + Send + Sync {
    /// Name shown in logs.
    fn name(&self) -> &str;

    /// Attempt to resolve a session for this request.  `Ok(None)` means
    /// "these credentials are not mine / not valid" – never an error.
    async fn load(
        &self,
        req: &ProxyRequest,
        response_headers: &mut HeaderMap,
    ) -> Result<Option<SessionState>, ProxyError>;
}

/// Ordered composition of loaders.  Re-entrant; all state lives on the
/// request scope and in the (internally synchronized) session store.
#[derive(Debug, Default)]
pub struct SessionChain {
    loaders: Vec<Arc<dyn SessionLoader>>,
}

impl SessionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, loader: Arc<dyn SessionLoader>) {
        self.loaders.push(loader);
    }

    /// Walk the chain.  The winning session is recorded on the request
    /// scope so repeated resolution within one request is free.
    pub async fn resolve(
        &self,
        req: &ProxyRequest,
        response_headers: &mut HeaderMap,
    ) -> Result<Option<SessionState>, ProxyError> {
        if let Some(existing) = req.session().await {
            return Ok(Some(existing));
        }

        for loader in &self.loaders {
            trace_fmt!("SessionChain", "trying session loader: {}", loader.name());
            if let Some(session) = loader.load(req, response_headers).await? {
                trace_fmt!(
                    "SessionChain",
                    "loader {} resolved session for {}",
                    loader.name(),
                    session.identity()
                );
                req.set_session(session.clone()).await;
                return Ok(Some(session));
            }
        }
        Ok(None)
    }
}
