// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identity provider abstraction.
//!
//! The proxy never talks OAuth2 wire formats itself; it consumes a
//! [`Provider`] capability set.  Optional lookups advertise themselves
//! as unsupported by returning [`ProviderError::NotImplemented`], which
//! the callback flow treats as a soft success (the field stays empty).

pub mod oidc;
pub mod verifier;


pub use oidc::{OidcProvider, OidcProviderConfig};
pub use verifier::{JwtVerifier, JwtVerifierConfig};

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider does not support this lookup.  Callers treat this
    /// as "leave the field empty", not as a failure.
    #[error("not implemented")]
    NotImplemented,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authorization code missing")]
    MissingCode,

    #[error("token endpoint error: {0}")]
    TokenEndpoint(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("{0}")]
    Other(String),
}

/// Capability set supplied by an identity provider adapter.
///
/// Only `login_url` and `redeem` are mandatory; everything else has a
/// conservative default so minimal adapters stay small.
#[async_trait]
pub trait Provider: fmt::Debug + Send + Sync {
    /// Display name for the sign-in page.
    fn name(&self) -> &str;

    /// Authorization URL the browser is redirected to at `/start`.
    /// `state` is opaque to the provider and echoed back verbatim.
    fn login_url(&self, redirect_uri: &str, state: &str) -> String;

    /// Exchange an authorization code for a session.
    async fn redeem(&self, redirect_uri: &str, code: &str)
        -> Result<SessionState, ProviderError>;

    async fn get_email(&self, _session: &SessionState) -> Result<String, ProviderError> {
        Err(ProviderError::NotImplemented)
    }

    async fn get_user(&self, _session: &SessionState) -> Result<String, ProviderError> {
        Err(ProviderError::NotImplemented)
    }

    async fn get_preferred_username(
        &self,
        _session: &SessionState,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotImplemented)
    }

    /// Refresh the session's tokens when the provider deems it due.
    /// `Ok(true)` means the session changed and must be re-persisted.
    async fn refresh_if_needed(
        &self,
        _session: &mut SessionState,
    ) -> Result<bool, ProviderError> {
        Ok(false)
    }

    /// Is a stored session still acceptable to the provider?
    async fn validate_session(&self, _session: &SessionState) -> bool {
        true
    }

    /// Group-level authorization for an authenticated email.
    fn validate_group(&self, _email: &str) -> bool {
        true
    }

    /// Materialize a session from verified bearer-token claims.
    fn session_from_claims(
        &self,
        raw_token: &str,
        claims: &serde_json::Value,
    ) -> Result<SessionState, ProviderError> {
        Ok(session_from_bearer_claims(raw_token, claims))
    }
}

/// Default bearer-token materializer: standard OIDC claims onto a
/// session, the raw token doubling as access and ID token.
pub fn session_from_bearer_claims(raw_token: &str, claims: &serde_json::Value) -> SessionState {
    SessionState {
        user: claim_str(claims, "sub"),
        email: claim_str(claims, "email"),
        preferred_username: claim_str(claims, "preferred_username"),
        access_token: raw_token.to_string(),
        id_token: raw_token.to_string(),
        refresh_token: String::new(),
        created_on: Some(Utc::now()),
        expires_on: claim_instant(claims, "exp"),
    }
}

pub(crate) fn claim_str(claims: &serde_json::Value, name: &str) -> String {
    claims
        .get(name)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn claim_instant(claims: &serde_json::Value, name: &str) -> Option<DateTime<Utc>> {
    claims
        .get(name)
        .and_then(|v| v.as_i64())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}
