// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OpenID-Connect provider adapter.
//!
//! Talks the authorization-code and refresh-token grants against
//! explicitly configured endpoints.  Identity claims come from the ID
//! token (verified when a JWKS is configured, otherwise taken as-is
//! since the token arrived over TLS from the token endpoint) and, for
//! the optional lookups, from the userinfo endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use url::Url;

use crate::core::ProxyError;
use crate::provider::verifier::{JwtVerifier, JwtVerifierConfig};
use crate::provider::{claim_str, Provider, ProviderError};
use crate::session::SessionState;
use crate::{debug_fmt, warn_fmt};

fn default_scope() -> String {
    "openid email profile".to_string()
}

fn default_name() -> String {
    "OpenID Connect".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OidcProviderConfig {
    /// Display name on the sign-in page.
    #[serde(default = "default_name")]
    pub name: String,

    pub client_id: String,
    pub client_secret: String,

    /// Authorization endpoint.
    pub auth_url: String,
    /// Token endpoint.
    pub token_url: String,
    /// Userinfo endpoint; absent means the optional lookups are
    /// advertised as not implemented.
    #[serde(default)]
    pub userinfo_url: Option<String>,

    #[serde(default = "default_scope")]
    pub scope: String,

    /// Issuer + JWKS for verifying ID tokens and bearer requests.
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub jwks_url: Option<String>,

    /// Email domains whose users pass group validation.  Empty accepts
    /// every authenticated account.
    #[serde(default)]
    pub allowed_groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug)]
pub struct OidcProvider {
    cfg: OidcProviderConfig,
    http: reqwest::Client,
    verifier: Option<Arc<JwtVerifier>>,
}

impl OidcProvider {
    pub fn new(cfg: OidcProviderConfig) -> Result<Self, ProxyError> {
        Url::parse(&cfg.auth_url)
            .map_err(|e| ProxyError::ConfigError(format!("invalid auth_url: {e}")))?;
        Url::parse(&cfg.token_url)
            .map_err(|e| ProxyError::ConfigError(format!("invalid token_url: {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent("gatehouse/oidc")
            .build()
            .map_err(ProxyError::ClientError)?;

        let verifier = match (&cfg.issuer, &cfg.jwks_url) {
            (Some(issuer), Some(jwks_url)) => Some(Arc::new(JwtVerifier::new(
                JwtVerifierConfig {
                    issuer: issuer.clone(),
                    jwks_uri: jwks_url.clone(),
                    audience: Some(cfg.client_id.clone()),
                    shared_secret: None,
                },
                http.clone(),
            ))),
            _ => None,
        };

        Ok(Self { cfg, http, verifier })
    }

    /// The verifier for this provider's own issuer, when configured.
    pub fn verifier(&self) -> Option<Arc<JwtVerifier>> {
        self.verifier.clone()
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant, ProviderError> {
        let response = self
            .http
            .post(&self.cfg.token_url)
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::TokenEndpoint(format!(
                "{status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::TokenEndpoint(format!("unparsable grant: {e}")))
    }

    async fn id_token_claims(&self, id_token: &str) -> Result<serde_json::Value, ProviderError> {
        if let Some(verifier) = &self.verifier {
            return verifier.verify(id_token).await;
        }
        // No JWKS configured: the token came straight from the token
        // endpoint over TLS, decode without signature verification.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        jsonwebtoken::decode::<serde_json::Value>(
            id_token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| ProviderError::InvalidToken(format!("unparsable ID token: {e}")))
    }

    async fn userinfo_field(
        &self,
        session: &SessionState,
        field: &str,
    ) -> Result<String, ProviderError> {
        let Some(userinfo_url) = &self.cfg.userinfo_url else {
            return Err(ProviderError::NotImplemented);
        };

        let payload: serde_json::Value = self
            .http
            .get(userinfo_url)
            .bearer_auth(&session.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("unparsable userinfo: {e}")))?;

        Ok(claim_str(&payload, field))
    }

    fn session_from_grant(&self, grant: TokenGrant, claims: serde_json::Value) -> SessionState {
        let now = Utc::now();
        SessionState {
            user: claim_str(&claims, "sub"),
            email: claim_str(&claims, "email"),
            preferred_username: claim_str(&claims, "preferred_username"),
            access_token: grant.access_token,
            id_token: grant.id_token.unwrap_or_default(),
            refresh_token: grant.refresh_token.unwrap_or_default(),
            created_on: Some(now),
            expires_on: grant.expires_in.map(|secs| now + Duration::seconds(secs)),
        }
    }
}

#[async_trait]
impl Provider for OidcProvider {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    fn login_url(&self, redirect_uri: &str, state: &str) -> String {
        // Validated at construction.
        let mut url = Url::parse(&self.cfg.auth_url).expect("auth_url validated at startup");
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.cfg.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.cfg.scope)
            .append_pair("state", state);
        url.to_string()
    }

    async fn redeem(
        &self,
        redirect_uri: &str,
        code: &str,
    ) -> Result<SessionState, ProviderError> {
        if code.is_empty() {
            return Err(ProviderError::MissingCode);
        }

        let grant = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("client_id", &self.cfg.client_id),
                ("client_secret", &self.cfg.client_secret),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ])
            .await?;

        let claims = match &grant.id_token {
            Some(id_token) => self.id_token_claims(id_token).await?,
            None => serde_json::Value::Null,
        };

        debug_fmt!("OidcProvider", "code redeemed for sub {:?}", claim_str(&claims, "sub"));
        Ok(self.session_from_grant(grant, claims))
    }

    async fn get_email(&self, session: &SessionState) -> Result<String, ProviderError> {
        self.userinfo_field(session, "email").await
    }

    async fn get_user(&self, session: &SessionState) -> Result<String, ProviderError> {
        self.userinfo_field(session, "sub").await
    }

    async fn get_preferred_username(
        &self,
        session: &SessionState,
    ) -> Result<String, ProviderError> {
        self.userinfo_field(session, "preferred_username").await
    }

    async fn refresh_if_needed(
        &self,
        session: &mut SessionState,
    ) -> Result<bool, ProviderError> {
        if session.refresh_token.is_empty() {
            return Ok(false);
        }

        let grant = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("client_id", &self.cfg.client_id),
                ("client_secret", &self.cfg.client_secret),
                ("refresh_token", &session.refresh_token),
            ])
            .await?;

        let now = Utc::now();
        session.access_token = grant.access_token;
        if let Some(id_token) = grant.id_token {
            session.id_token = id_token;
        }
        if let Some(refresh_token) = grant.refresh_token {
            session.refresh_token = refresh_token;
        }
        session.created_on = Some(now);
        session.expires_on = grant.expires_in.map(|secs| now + Duration::seconds(secs));

        debug_fmt!("OidcProvider", "refreshed session for {}", session.identity());
        Ok(true)
    }

    async fn validate_session(&self, session: &SessionState) -> bool {
        let Some(userinfo_url) = &self.cfg.userinfo_url else {
            return !session.access_token.is_empty();
        };
        match self
            .http
            .get(userinfo_url)
            .bearer_auth(&session.access_token)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn_fmt!("OidcProvider", "session validation failed: {}", e);
                false
            }
        }
    }

    fn validate_group(&self, email: &str) -> bool {
        if self.cfg.allowed_groups.is_empty() {
            return true;
        }
        let Some((_, domain)) = email.rsplit_once('@') else {
            return false;
        };
        self.cfg
            .allowed_groups
            .iter()
            .any(|g| g.eq_ignore_ascii_case(domain))
    }
}
