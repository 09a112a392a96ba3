// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Encrypted cookie session store.
//!
//! The whole [`SessionState`] travels in the session cookie as
//! AES-256-GCM sealed JSON, so the proxy needs no server-side storage
//! and any replica holding the cookie secret can decrypt it.  Payload
//! layout is `v1.` + base64url(nonce ‖ ciphertext).

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cookies::{
    make_cookie, make_expired_cookie, read_cookie, set_cookie_header, CookieOptions,
};
use crate::core::{ProxyError, ProxyRequest};
use crate::session::{SessionState, SessionStore};
use crate::{debug_fmt, warn_fmt};

const PAYLOAD_PREFIX: &str = "v1.";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Seals and opens cookie payloads with a 32-byte key.
pub(crate) struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PayloadCipher")
    }
}

impl PayloadCipher {
    pub(crate) fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new((&key).into()),
        }
    }

    pub(crate) fn seal<T: Serialize>(&self, value: &T) -> Result<String, ProxyError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| ProxyError::SessionError(format!("serialize session: {e}")))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_ref())
            .map_err(|_| ProxyError::SessionError("cookie encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        Ok(format!("{PAYLOAD_PREFIX}{}", URL_SAFE_NO_PAD.encode(out)))
    }

    pub(crate) fn open<T: DeserializeOwned>(&self, value: &str) -> Result<T, ProxyError> {
        fn tampered() -> ProxyError {
            ProxyError::SessionError("cookie payload rejected".to_string())
        }

        let encoded = value.strip_prefix(PAYLOAD_PREFIX).ok_or_else(tampered)?;
        let raw = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| tampered())?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(tampered());
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| tampered())?;

        serde_json::from_slice(&plaintext).map_err(|_| tampered())
    }
}

/// Decode the configured cookie secret into a 32-byte key.
/// Hex (64 chars) and standard or url-safe base64 are accepted.
pub(crate) fn decode_cookie_secret(secret: &str) -> Result<[u8; 32], ProxyError> {
    let value = secret.trim();
    if value.is_empty() {
        return Err(ProxyError::ConfigError(
            "cookie secret is required for the cookie session store".to_string(),
        ));
    }

    let bytes = if let Ok(raw) = hex::decode(value) {
        raw
    } else if let Ok(raw) = STANDARD.decode(value) {
        raw
    } else if let Ok(raw) = URL_SAFE_NO_PAD.decode(value) {
        raw
    } else {
        return Err(ProxyError::ConfigError(
            "cookie secret must be hex or base64".to_string(),
        ));
    };

    <[u8; 32]>::try_from(bytes).map_err(|raw: Vec<u8>| {
        ProxyError::ConfigError(format!(
            "cookie secret must decode to 32 bytes, got {}",
            raw.len()
        ))
    })
}

/// Session store that keeps the session entirely client-side.
#[derive(Debug)]
pub struct CookieSessionStore {
    opts: CookieOptions,
    cipher: PayloadCipher,
}

impl CookieSessionStore {
    pub fn new(opts: CookieOptions) -> Result<Self, ProxyError> {
        let key = decode_cookie_secret(&opts.secret)?;
        Ok(Self {
            opts,
            cipher: PayloadCipher::new(key),
        })
    }
}

#[async_trait]
impl SessionStore for CookieSessionStore {
    async fn load(&self, req: &ProxyRequest) -> Result<Option<SessionState>, ProxyError> {
        let Some(value) = read_cookie(&req.headers, &self.opts.name) else {
            return Ok(None);
        };

        let session: SessionState = match self.cipher.open(&value) {
            Ok(s) => s,
            Err(e) => {
                // Tampered or minted under a rotated secret.  Not fatal:
                // the caller simply is not authenticated.
                warn_fmt!("SessionStore", "discarding session cookie: {}", e);
                return Ok(None);
            }
        };

        if session.is_expired() {
            debug_fmt!("SessionStore", "session for {} expired", session.identity());
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn save(
        &self,
        req: &ProxyRequest,
        response_headers: &mut HeaderMap,
        session: &SessionState,
    ) -> Result<(), ProxyError> {
        let sealed = self.cipher.seal(session)?;
        let cookie = make_cookie(
            &self.opts,
            &req.host,
            &self.opts.name,
            &sealed,
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
        let cookie = make_expired_cookie(&self.opts, &req.host, &self.opts.name);
        set_cookie_header(response_headers, &cookie);
        Ok(())
    }
}
