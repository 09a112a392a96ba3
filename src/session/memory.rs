// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Server-side session store keyed by an opaque ticket cookie.
//!
//! Suitable for single-instance deployments and used throughout the
//! test suite.  The browser only ever sees a random ticket; tokens
//! stay in process memory.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::RngCore;
use reqwest::header::HeaderMap;
use tokio::sync::RwLock;

use crate::cookies::{
    make_cookie, make_expired_cookie, read_cookie, set_cookie_header, CookieOptions,
};
use crate::core::{ProxyError, ProxyRequest};
use crate::session::{SessionState, SessionStore};

#[derive(Debug)]
pub struct MemorySessionStore {
    opts: CookieOptions,
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl MemorySessionStore {
    pub fn new(opts: CookieOptions) -> Self {
        Self {
            opts,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn new_ticket() -> String {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        hex::encode(raw)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, req: &ProxyRequest) -> Result<Option<SessionState>, ProxyError> {
        let Some(ticket) = read_cookie(&req.headers, &self.opts.name) else {
            return Ok(None);
        };

        let mut sessions = self.sessions.write().await;
        match sessions.get(&ticket) {
            Some(s) if s.is_expired() => {
                sessions.remove(&ticket);
                Ok(None)
            }
            Some(s) => Ok(Some(s.clone())),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        req: &ProxyRequest,
        response_headers: &mut HeaderMap,
        session: &SessionState,
    ) -> Result<(), ProxyError> {
        // Reuse the caller's ticket when it already has one so a refresh
        // does not orphan the previous entry.
        let ticket =
            read_cookie(&req.headers, &self.opts.name).unwrap_or_else(Self::new_ticket);

        self.sessions
            .write()
            .await
            .insert(ticket.clone(), session.clone());

        let cookie = make_cookie(
            &self.opts,
            &req.host,
            &self.opts.name,
            &ticket,
            self.opts.expire(),
        );
        set_cookie_header(response_headers, &cookie);
        Ok(())
    }

    async fn clear(
        &self,
        req: &ProxyRequest,
        response_headers: &mut HeaderMap,
    ) -> Result<(), ProxyError> {
        if let Some(ticket) = read_cookie(&req.headers, &self.opts.name) {
            self.sessions.write().await.remove(&ticket);
        }
        let cookie = make_expired_cookie(&self.opts, &req.host, &self.opts.name);
        set_cookie_header(response_headers, &cookie);
        Ok(())
    }
}
