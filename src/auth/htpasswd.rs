// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flat-file credential store in Apache htpasswd format.
//!
//! Accepted entry kinds: bcrypt (`$2a$` / `$2b$` / `$2y$`) and SHA1
//! (`{SHA}`).  Anything else fails the load – a typo in a credential
//! file must abort startup, not silently lock a user out.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use crate::core::ProxyError;
use crate::warn_fmt;

const SHA_PREFIX: &str = "{SHA}";

#[derive(Clone)]
enum StoredHash {
    Bcrypt(String),
    /// base64 of the raw SHA1 digest, as htpasswd stores it
    Sha1(String),
}

/// Validates username/password pairs against a loaded htpasswd file.
pub struct HtpasswdValidator {
    users: HashMap<String, StoredHash>,
}

impl fmt::Debug for HtpasswdValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtpasswdValidator")
            .field("users", &self.users.len())
            .finish()
    }
}

impl HtpasswdValidator {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProxyError> {
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            ProxyError::ConfigError(format!(
                "could not read htpasswd file {:?}: {e}",
                path.as_ref()
            ))
        })?;
        Self::from_lines(&contents)
    }

    pub fn from_lines(contents: &str) -> Result<Self, ProxyError> {
        let mut users = HashMap::new();

        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((user, hash)) = line.split_once(':') else {
                return Err(ProxyError::ConfigError(format!(
                    "htpasswd line {} is not user:hash",
                    lineno + 1
                )));
            };

            let stored = if let Some(digest) = hash.strip_prefix(SHA_PREFIX) {
                StoredHash::Sha1(digest.to_string())
            } else if hash.starts_with("$2a$")
                || hash.starts_with("$2b$")
                || hash.starts_with("$2y$")
            {
                StoredHash::Bcrypt(hash.to_string())
            } else {
                return Err(ProxyError::ConfigError(format!(
                    "htpasswd line {}: unsupported hash format (bcrypt and {{SHA}} only)",
                    lineno + 1
                )));
            };

            users.insert(user.to_string(), stored);
        }

        Ok(Self { users })
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn validate(&self, user: &str, password: &str) -> bool {
        let Some(stored) = self.users.get(user) else {
            return false;
        };

        match stored {
            StoredHash::Bcrypt(hash) => match bcrypt::verify(password, hash) {
                Ok(ok) => ok,
                Err(e) => {
                    warn_fmt!("Htpasswd", "bcrypt verification error for {}: {}", user, e);
                    false
                }
            },
            StoredHash::Sha1(expected_b64) => {
                let digest = Sha1::digest(password.as_bytes());
                let given = STANDARD.encode(digest);
                bool::from(given.as_bytes().ct_eq(expected_b64.as_bytes()))
            }
        }
    }
}
