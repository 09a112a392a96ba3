// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bearer-token session loader.
//!
//! Enabled when the policy names trusted issuers.  Tokens are tried
//! against each configured verifier in declaration order; the first
//! verifier that accepts the token materializes the session, through
//! the provider when one is attached to the entry.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;

use crate::auth::SessionLoader;
use crate::core::{ProxyError, ProxyRequest};
use crate::provider::{session_from_bearer_claims, JwtVerifier, Provider};
use crate::session::SessionState;
use crate::{debug_fmt, trace_fmt};

const BEARER: &str = "bearer ";

// Cheap shape check before handing the header to a verifier.
static JWT_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*$").expect("static pattern")
});

/// One trusted issuer: a verifier plus an optional provider-supplied
/// materializer.  Without a provider the standard OIDC claims map.
#[derive(Debug)]
pub struct BearerIssuer {
    pub verifier: Arc<JwtVerifier>,
    pub provider: Option<Arc<dyn Provider>>,
}

#[derive(Debug)]
pub struct JwtSessionLoader {
    issuers: Vec<BearerIssuer>,
}

impl JwtSessionLoader {
    pub fn new(issuers: Vec<BearerIssuer>) -> Self {
        Self { issuers }
    }

    fn bearer_token(req: &ProxyRequest) -> Option<&str> {
        let header = req.header("authorization")?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix(BEARER))?
            .trim();
        JWT_SHAPE.is_match(token).then_some(token)
    }

    fn materialize(
        issuer: &BearerIssuer,
        token: &str,
        claims: &serde_json::Value,
    ) -> Result<SessionState, ProxyError> {
        match &issuer.provider {
            Some(provider) => Ok(provider.session_from_claims(token, claims)?),
            None => Ok(session_from_bearer_claims(token, claims)),
        }
    }
}

#[async_trait]
impl SessionLoader for JwtSessionLoader {
    fn name(&self) -> &str {
        "jwt"
    }

    async fn load(
        &self,
        req: &ProxyRequest,
        _response_headers: &mut HeaderMap,
    ) -> Result<Option<SessionState>, ProxyError> {
        let Some(token) = Self::bearer_token(req) else {
            return Ok(None);
        };

        for issuer in &self.issuers {
            match issuer.verifier.verify(token).await {
                Ok(claims) => {
                    debug_fmt!(
                        "JwtSessionLoader",
                        "bearer token accepted by issuer {}",
                        issuer.verifier.issuer()
                    );
                    return Self::materialize(issuer, token, &claims).map(Some);
                }
                Err(e) => {
                    trace_fmt!(
                        "JwtSessionLoader",
                        "issuer {} declined token: {}",
                        issuer.verifier.issuer(),
                        e
                    );
                }
            }
        }

        // No verifier accepted the token.  The request proceeds
        // unauthenticated; later loaders may still claim it.
        debug_fmt!("JwtSessionLoader", "bearer token not accepted by any issuer");
        Ok(None)
    }
}
