// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identity header projection.
//!
//! For authenticated requests the configured policy decides which
//! identity headers are stamped onto the forwarded request and onto the
//! response.  The hardening invariant throughout: a header the policy
//! *could* set is either set from the current session or removed –
//! an inbound client value must never survive, or any caller could
//! impersonate any user to an upstream that trusts these headers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::session::SessionState;

pub const X_FORWARDED_USER: &str = "x-forwarded-user";
pub const X_FORWARDED_EMAIL: &str = "x-forwarded-email";
pub const X_FORWARDED_PREFERRED_USERNAME: &str = "x-forwarded-preferred-username";
pub const X_FORWARDED_ACCESS_TOKEN: &str = "x-forwarded-access-token";
pub const X_AUTH_REQUEST_USER: &str = "x-auth-request-user";
pub const X_AUTH_REQUEST_EMAIL: &str = "x-auth-request-email";
pub const X_AUTH_REQUEST_PREFERRED_USERNAME: &str = "x-auth-request-preferred-username";
pub const X_AUTH_REQUEST_ACCESS_TOKEN: &str = "x-auth-request-access-token";
pub const GAP_AUTH: &str = "gap-auth";

/// Which identity headers to emit; immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderPolicy {
    /// `Authorization: Basic` + X-Forwarded-* on the upstream request.
    pub pass_basic_auth: bool,
    /// X-Forwarded-* on the upstream request, without Authorization.
    pub pass_user_headers: bool,
    /// X-Forwarded-Access-Token on the upstream request.
    pub pass_access_token: bool,
    /// `Authorization: Bearer <id_token>` on the upstream request.
    pub pass_authorization: bool,
    /// X-Auth-Request-* on the response.
    pub set_xauthrequest: bool,
    /// `Authorization: Basic` on the response.
    pub set_basic_auth: bool,
    /// `Authorization: Bearer <id_token>` on the response.
    pub set_authorization: bool,
    /// Substitute email for user wherever the user is emitted.
    pub prefer_email_to_user: bool,
    /// Password paired with the user in synthesized Basic credentials.
    pub basic_auth_password: String,
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self {
            pass_basic_auth: true,
            pass_user_headers: true,
            pass_access_token: false,
            pass_authorization: false,
            set_xauthrequest: false,
            set_basic_auth: false,
            set_authorization: false,
            prefer_email_to_user: false,
            basic_auth_password: String::new(),
        }
    }
}

impl HeaderPolicy {
    /// The user string to forward: email when preferred and present.
    fn effective_user<'a>(&self, session: &'a SessionState) -> (&'a str, bool) {
        if self.prefer_email_to_user && !session.email.is_empty() {
            (&session.email, true)
        } else {
            (&session.user, false)
        }
    }

    fn basic_credentials(&self, user: &str) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{user}:{}", self.basic_auth_password))
        )
    }
}

// Set `name` to `value`, or remove it when the value is empty.  The
// removal half is what keeps client-supplied values out.
fn set_or_delete(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if value.is_empty() {
        headers.remove(name);
    } else {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(_) => {
                headers.remove(name);
            }
        }
    }
}

/// Project the session onto the request about to be forwarded upstream.
pub fn apply_request_headers(
    policy: &HeaderPolicy,
    headers: &mut HeaderMap,
    session: &SessionState,
) {
    if policy.pass_basic_auth || policy.pass_user_headers {
        let (user, email_substituted) = policy.effective_user(session);
        set_or_delete(headers, X_FORWARDED_USER, user);

        if email_substituted {
            // The email already is the forwarded identity.
            headers.remove(X_FORWARDED_EMAIL);
        } else {
            set_or_delete(headers, X_FORWARDED_EMAIL, &session.email);
        }
        set_or_delete(
            headers,
            X_FORWARDED_PREFERRED_USERNAME,
            &session.preferred_username,
        );
    }

    if policy.pass_basic_auth {
        let (user, _) = policy.effective_user(session);
        if user.is_empty() {
            headers.remove(AUTHORIZATION);
        } else if let Ok(v) = HeaderValue::from_str(&policy.basic_credentials(user)) {
            headers.insert(AUTHORIZATION, v);
        }
    }

    if policy.pass_access_token {
        set_or_delete(headers, X_FORWARDED_ACCESS_TOKEN, &session.access_token);
    }

    if policy.pass_authorization {
        if session.id_token.is_empty() {
            headers.remove(AUTHORIZATION);
        } else if let Ok(v) =
            HeaderValue::from_str(&format!("Bearer {}", session.id_token))
        {
            headers.insert(AUTHORIZATION, v);
        }
    }
}

/// Project the session onto the response going back to the client.
/// The `GAP-Auth` header is always stamped; the rest follow the policy.
pub fn apply_response_headers(
    policy: &HeaderPolicy,
    headers: &mut HeaderMap,
    session: &SessionState,
) {
    if policy.set_xauthrequest {
        set_or_delete(headers, X_AUTH_REQUEST_USER, &session.user);
        set_or_delete(headers, X_AUTH_REQUEST_EMAIL, &session.email);
        set_or_delete(
            headers,
            X_AUTH_REQUEST_PREFERRED_USERNAME,
            &session.preferred_username,
        );
        if policy.pass_access_token {
            set_or_delete(headers, X_AUTH_REQUEST_ACCESS_TOKEN, &session.access_token);
        }
    }

    if policy.set_basic_auth {
        let (user, _) = policy.effective_user(session);
        if user.is_empty() {
            headers.remove(AUTHORIZATION);
        } else if let Ok(v) = HeaderValue::from_str(&policy.basic_credentials(user)) {
            headers.insert(AUTHORIZATION, v);
        }
    }

    if policy.set_authorization {
        if session.id_token.is_empty() {
            headers.remove(AUTHORIZATION);
        } else if let Ok(v) =
            HeaderValue::from_str(&format!("Bearer {}", session.id_token))
        {
            headers.insert(AUTHORIZATION, v);
        }
    }

    set_or_delete(headers, GAP_AUTH, session.identity());
}

/// Strip mode: delete every inbound identity header the policy would
/// otherwise emit, before an *unauthenticated* whitelisted request is
/// forwarded.
pub fn strip_request_headers(policy: &HeaderPolicy, headers: &mut HeaderMap) {
    if policy.pass_basic_auth || policy.pass_user_headers {
        headers.remove(X_FORWARDED_USER);
        headers.remove(X_FORWARDED_EMAIL);
        headers.remove(X_FORWARDED_PREFERRED_USERNAME);
    }
    if policy.pass_basic_auth || policy.pass_authorization {
        headers.remove(AUTHORIZATION);
    }
    if policy.pass_access_token {
        headers.remove(X_FORWARDED_ACCESS_TOKEN);
    }
}
