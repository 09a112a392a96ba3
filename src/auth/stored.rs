// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stored-session loader – the cookie path.
//!
//! Recovers the session from the session store and, once the refresh
//! period has elapsed, refreshes it through the provider – or, when
//! the provider has nothing to refresh with, asks it to re-validate
//! the session outright.  A failed refresh or validation clears the
//! stored session: surfacing a half-dead session to the handlers
//! would let a revoked grant linger indefinitely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use crate::auth::SessionLoader;
use crate::core::{ProxyError, ProxyRequest};
use crate::provider::Provider;
use crate::session::{SessionState, SessionStore};
use crate::{debug_fmt, warn_fmt};

#[derive(Debug)]
pub struct StoredSessionLoader {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn Provider>,
    /// Zero disables refreshing.
    refresh_period: Duration,
}

impl StoredSessionLoader {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn Provider>,
        refresh_period: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            refresh_period,
        }
    }

    fn refresh_due(&self, session: &SessionState) -> bool {
        if self.refresh_period.is_zero() {
            return false;
        }
        match session.age() {
            Some(age) => age.to_std().map_or(false, |age| age >= self.refresh_period),
            None => false,
        }
    }
}

#[async_trait]
impl SessionLoader for StoredSessionLoader {
    fn name(&self) -> &str {
        "stored"
    }

    async fn load(
        &self,
        req: &ProxyRequest,
        response_headers: &mut HeaderMap,
    ) -> Result<Option<SessionState>, ProxyError> {
        let mut session = match self.store.load(req).await {
            Ok(Some(session)) => session,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn_fmt!("StoredSessionLoader", "session store load failed: {}", e);
                return Ok(None);
            }
        };

        if self.refresh_due(&session) {
            match self.provider.refresh_if_needed(&mut session).await {
                Ok(true) => {
                    debug_fmt!(
                        "StoredSessionLoader",
                        "session for {} refreshed, persisting",
                        session.identity()
                    );
                    self.store.save(req, response_headers, &session).await?;
                }
                Ok(false) => {
                    // Past the refresh period and the provider had
                    // nothing to refresh with: it must confirm the
                    // session is still acceptable.
                    if !self.provider.validate_session(&session).await {
                        debug_fmt!(
                            "StoredSessionLoader",
                            "stale session for {} rejected by provider",
                            session.identity()
                        );
                        self.store.clear(req, response_headers).await?;
                        return Ok(None);
                    }
                }
                Err(e) => {
                    warn_fmt!(
                        "StoredSessionLoader",
                        "refresh failed for {}, clearing session: {}",
                        session.identity(),
                        e
                    );
                    self.store.clear(req, response_headers).await?;
                    return Ok(None);
                }
            }
        }

        Ok(Some(session))
    }
}
