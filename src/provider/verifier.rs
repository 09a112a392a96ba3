// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bearer-token verifier with a cached JWKS.
//!
//! Supported algs : HS256/384/512 · RS256/384/512 · PS256/384/512
//!                  ES256/384 · EdDSA (Ed25519)
//! HMAC secret    : optional `shared-secret`, required for HS* algs
//! JWKS refresh   : lazy on first use, then every 30 min

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, OctetKeyParameters};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::provider::ProviderError;
use crate::{debug_fmt, trace_fmt, warn_fmt};

pub const JWKS_REFRESH: Duration = Duration::from_secs(30 * 60);

const ALLOWED_ALGS: [Algorithm; 12] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
    Algorithm::HS256,
    Algorithm::HS384,
    Algorithm::HS512,
];

/// One trusted issuer, as configured.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtVerifierConfig {
    /// Expected `iss` claim.
    pub issuer: String,

    /// Where the issuer publishes its signing keys.
    #[serde(rename = "jwks-uri")]
    pub jwks_uri: String,

    /// Expected `aud` claim (optional).
    #[serde(default)]
    pub audience: Option<String>,

    /// Shared secret for HS* algorithms (optional).
    #[serde(rename = "shared-secret", default)]
    pub shared_secret: Option<String>,
}

/// Verifies bearer tokens against one issuer's key set.
#[derive(Debug)]
pub struct JwtVerifier {
    issuer: String,
    audience: Option<String>,
    shared_secret: Option<String>,
    jwks_uri: String,
    jwks: Arc<RwLock<Option<JwkSet>>>,
    last_refresh: Arc<RwLock<Option<tokio::time::Instant>>>,
    http: Client,
}

impl JwtVerifier {
    pub fn new(cfg: JwtVerifierConfig, http: Client) -> Self {
        Self {
            issuer: cfg.issuer,
            audience: cfg.audience,
            shared_secret: cfg.shared_secret,
            jwks_uri: cfg.jwks_uri,
            jwks: Arc::new(RwLock::new(None)),
            last_refresh: Arc::new(RwLock::new(None)),
            http,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    async fn refresh_jwks(&self) -> Result<(), ProviderError> {
        let now = tokio::time::Instant::now();

        let should_refresh = {
            let cache_empty = self.jwks.read().await.is_none();
            let stale = self
                .last_refresh
                .read()
                .await
                .map_or(true, |at| now.duration_since(at) >= JWKS_REFRESH);
            cache_empty || stale
        };
        if !should_refresh {
            trace_fmt!("JwtVerifier", "JWKS cache for {} still fresh", self.issuer);
            return Ok(());
        }

        debug_fmt!("JwtVerifier", "refreshing JWKS from {}", self.jwks_uri);
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidToken(format!("unparsable JWKS: {e}")))?;

        debug_fmt!(
            "JwtVerifier",
            "JWKS refresh for {} found {} keys",
            self.issuer,
            jwks.keys.len()
        );

        *self.jwks.write().await = Some(jwks);
        *self.last_refresh.write().await = Some(now);
        Ok(())
    }

    fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, ProviderError> {
        match &jwk.algorithm {
            AlgorithmParameters::RSA(params) => {
                DecodingKey::from_rsa_components(&params.n, &params.e)
                    .map_err(|e| ProviderError::InvalidToken(format!("invalid RSA key: {e}")))
            }
            AlgorithmParameters::EllipticCurve(params) => {
                DecodingKey::from_ec_components(&params.x, &params.y)
                    .map_err(|e| ProviderError::InvalidToken(format!("invalid EC key: {e}")))
            }
            AlgorithmParameters::OctetKey(OctetKeyParameters { value, .. }) => {
                Ok(DecodingKey::from_secret(value.as_bytes()))
            }
            AlgorithmParameters::OctetKeyPair(params) => DecodingKey::from_ed_components(&params.x)
                .map_err(|e| ProviderError::InvalidToken(format!("invalid OKP key: {e}"))),
        }
    }

    async fn key_by_id(&self, kid: &str) -> Result<Option<DecodingKey>, ProviderError> {
        self.refresh_jwks().await?;
        let jwks = self.jwks.read().await;
        let Some(jwks) = &*jwks else {
            return Err(ProviderError::InvalidToken("no JWKS available".to_string()));
        };
        jwks.keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .map(Self::jwk_to_decoding_key)
            .transpose()
    }

    fn shared_secret_key(&self, alg: Algorithm) -> Result<DecodingKey, ProviderError> {
        let is_hmac = matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512);
        match (&self.shared_secret, is_hmac) {
            (Some(secret), true) => Ok(DecodingKey::from_secret(secret.as_bytes())),
            (_, false) => Err(ProviderError::InvalidToken(format!(
                "algorithm {alg:?} requires a key from the JWKS"
            ))),
            (None, true) => Err(ProviderError::InvalidToken(
                "HMAC algorithms require a configured shared secret".to_string(),
            )),
        }
    }

    /// Verify signature, issuer, audience and expiry; returns the claims.
    pub async fn verify(&self, token: &str) -> Result<serde_json::Value, ProviderError> {
        let header = decode_header(token)
            .map_err(|e| ProviderError::InvalidToken(format!("invalid JWT header: {e}")))?;

        if !ALLOWED_ALGS.contains(&header.alg) {
            return Err(ProviderError::InvalidToken(format!(
                "algorithm not allowed: {:?}",
                header.alg
            )));
        }

        // A kid must resolve through the JWKS even for HMAC tokens; the
        // shared secret only ever backs tokens without one.  This closes
        // the algorithm-confusion downgrade where an attacker re-signs a
        // public-key token with HS* and the public key as secret.
        let key = match &header.kid {
            Some(kid) => match self.key_by_id(kid).await? {
                Some(key) => key,
                None => {
                    return Err(ProviderError::InvalidToken(format!(
                        "key id {kid:?} not found in JWKS for {}",
                        self.issuer
                    )));
                }
            },
            None => self.shared_secret_key(header.alg)?,
        };

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        match decode::<serde_json::Value>(token, &key, &validation) {
            Ok(data) => {
                trace_fmt!("JwtVerifier", "token accepted for issuer {}", self.issuer);
                Ok(data.claims)
            }
            Err(e) => {
                warn_fmt!("JwtVerifier", "token rejected for {}: {}", self.issuer, e);
                Err(ProviderError::InvalidToken(e.to_string()))
            }
        }
    }
}
