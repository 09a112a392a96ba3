// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session state and the pluggable session store.
//!
//! A [`SessionState`] is what the proxy knows about an authenticated
//! browser.  Stores persist it between requests: the default
//! [`CookieSessionStore`] keeps the whole state in an encrypted cookie,
//! [`MemorySessionStore`] keeps it server-side behind an opaque ticket.
//! Both append `Set-Cookie` headers onto the response being built, which
//! is the only way a store may touch the response.

mod cookie;
mod memory;


pub use cookie::CookieSessionStore;
pub use memory::MemorySessionStore;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::core::{ProxyError, ProxyRequest};

/// Everything the proxy retains about an authenticated caller.
///
/// Either `user` or `email` is non-empty for a populated session; both
/// may be set.  Token fields are empty strings when the credential
/// source does not supply them (htpasswd logins carry only `user`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub preferred_username: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_on: Option<DateTime<Utc>>,
}

impl SessionState {
    /// A fresh session carrying only a username (htpasswd / basic auth).
    pub fn for_user(user: &str) -> Self {
        Self {
            user: user.to_string(),
            created_on: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Does this record identify anyone at all?
    pub fn is_populated(&self) -> bool {
        !self.user.is_empty() || !self.email.is_empty()
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expires_on, Some(t) if t <= Utc::now())
    }

    /// Time elapsed since the session was minted.
    pub fn age(&self) -> Option<Duration> {
        self.created_on.map(|t| Utc::now() - t)
    }

    /// The string used to identify this session in logs and the
    /// `GAP-Auth` header: email when present, otherwise user.
    pub fn identity(&self) -> &str {
        if self.email.is_empty() {
            &self.user
        } else {
            &self.email
        }
    }
}

// Tokens never appear in log output.
impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Session{{user:{} email:{} access_token:{} id_token:{} refresh_token:{}}}",
            self.user,
            self.email,
            !self.access_token.is_empty(),
            !self.id_token.is_empty(),
            !self.refresh_token.is_empty(),
        )
    }
}

/// Persistence for [`SessionState`] between requests.
///
/// Implementations must be safe for concurrent use; the proxy never
/// serializes access to the store.  `save` and `clear` communicate with
/// the browser exclusively by appending `Set-Cookie` headers to
/// `response_headers`.
#[async_trait]
pub trait SessionStore: fmt::Debug + Send + Sync {
    /// Recover the session the request's cookies refer to, if any.
    async fn load(&self, req: &ProxyRequest) -> Result<Option<SessionState>, ProxyError>;

    /// Persist `session` and point the browser at it.
    async fn save(
        &self,
        req: &ProxyRequest,
        response_headers: &mut HeaderMap,
        session: &SessionState,
    ) -> Result<(), ProxyError>;

    /// Drop the stored session and instruct the browser to forget it.
    async fn clear(
        &self,
        req: &ProxyRequest,
        response_headers: &mut HeaderMap,
    ) -> Result<(), ProxyError>;
}
