// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Basic-auth session loader backed by the htpasswd validator.
//!
//! A successful validation attaches a session carrying only `user`;
//! no tokens, no email.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::HeaderMap;

use crate::auth::{HtpasswdValidator, SessionLoader};
use crate::core::{ProxyError, ProxyRequest};
use crate::logging::audit;
use crate::session::SessionState;
use crate::trace_fmt;

const BASIC: &str = "basic ";

#[derive(Debug)]
pub struct BasicAuthSessionLoader {
    validator: Arc<HtpasswdValidator>,
}

impl BasicAuthSessionLoader {
    pub fn new(validator: Arc<HtpasswdValidator>) -> Self {
        Self { validator }
    }

    fn credentials(req: &ProxyRequest) -> Option<(String, String)> {
        let header = req.header("authorization")?;
        let encoded = header
            .strip_prefix("Basic ")
            .or_else(|| header.strip_prefix(BASIC))?;

        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }
}

#[async_trait]
impl SessionLoader for BasicAuthSessionLoader {
    fn name(&self) -> &str {
        "basic"
    }

    async fn load(
        &self,
        req: &ProxyRequest,
        _response_headers: &mut HeaderMap,
    ) -> Result<Option<SessionState>, ProxyError> {
        let Some((user, password)) = Self::credentials(req) else {
            trace_fmt!("BasicAuthSessionLoader", "no basic credentials on request");
            return Ok(None);
        };

        let remote = req.remote_addr().await;
        if self.validator.validate(&user, &password) {
            audit::auth_success(&user, remote.as_deref(), "authenticated via basic credentials");
            Ok(Some(SessionState::for_user(&user)))
        } else {
            audit::auth_failure(&user, remote.as_deref(), "invalid basic credentials");
            Ok(None)
        }
    }
}
