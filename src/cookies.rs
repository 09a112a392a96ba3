// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cookie construction shared by the session stores and the OAuth2 flow.
//!
//! All cookies the proxy writes – the session cookie, its `_csrf`
//! companion and the `X-Authorization` WebSocket cookie – carry the same
//! attribute set from [`CookieOptions`]; only name, value and lifetime
//! differ.  The Domain attribute is chosen per request: the longest
//! configured domain that is a suffix of the request host wins.

use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use cookie::{Cookie, SameSite};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use serde::{Deserialize, Serialize};

use crate::proxy::redirect::split_host_port;
use crate::warn_fmt;

/// Cookie attributes, fixed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieOptions {
    /// Name of the session cookie; the CSRF companion is `<name>_csrf`.
    #[serde(default = "default_name")]
    pub name: String,

    /// Secret for the encrypted cookie session store (hex or base64,
    /// 32 bytes once decoded).  Unused by the in-memory store.
    #[serde(default)]
    pub secret: String,

    /// Domains the cookie may be scoped to.  Empty means host-only.
    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub secure: bool,

    #[serde(default = "default_true")]
    pub http_only: bool,

    /// "lax", "strict", "none" or empty for no attribute.
    #[serde(default)]
    pub same_site: String,

    /// Session cookie lifetime in seconds.
    #[serde(default = "default_expire")]
    pub expire_secs: u64,

    /// Seconds after session creation before a provider refresh is
    /// attempted.  Zero disables refreshing.
    #[serde(default)]
    pub refresh_secs: u64,
}

fn default_name() -> String {
    "_gatehouse".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_expire() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: default_name(),
            secret: String::new(),
            domains: Vec::new(),
            path: default_path(),
            secure: true,
            http_only: true,
            same_site: String::new(),
            expire_secs: default_expire(),
            refresh_secs: 0,
        }
    }
}

impl CookieOptions {
    /// Name of the ephemeral CSRF cookie.
    pub fn csrf_name(&self) -> String {
        format!("{}_csrf", self.name)
    }

    pub fn expire(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.expire_secs)
    }

    pub fn refresh(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_secs)
    }

    fn parsed_same_site(&self) -> Option<SameSite> {
        match self.same_site.to_ascii_lowercase().as_str() {
            "lax" => Some(SameSite::Lax),
            "strict" => Some(SameSite::Strict),
            "none" => Some(SameSite::None),
            _ => None,
        }
    }
}

/// Pick the Domain attribute for a request host: the longest configured
/// domain that is a suffix of the host.  Logs a warning when domains are
/// configured but none matches; the cookie is then issued host-only.
pub fn cookie_domain(opts: &CookieOptions, request_host: &str) -> Option<String> {
    if opts.domains.is_empty() {
        return None;
    }

    let (host, _) = split_host_port(request_host);
    let mut best: Option<&str> = None;
    for domain in &opts.domains {
        let bare = domain.trim_start_matches('.');
        if (host == bare || host.ends_with(&format!(".{bare}")))
            && best.map_or(true, |b| domain.len() > b.len())
        {
            best = Some(domain);
        }
    }

    if best.is_none() {
        warn_fmt!(
            "Cookies",
            "request host {:?} does not match any configured cookie domain {:?}",
            host,
            opts.domains
        );
    }
    best.map(|d| d.trim_start_matches('.').to_string())
}

/// Build a cookie with the configured attribute set.
pub fn make_cookie(
    opts: &CookieOptions,
    request_host: &str,
    name: &str,
    value: &str,
    max_age: std::time::Duration,
) -> Cookie<'static> {
    let expires = OffsetDateTime::now_utc()
        + CookieDuration::seconds(max_age.as_secs().min(i64::MAX as u64) as i64);

    let mut builder = Cookie::build((name.to_string(), value.to_string()))
        .path(opts.path.clone())
        .secure(opts.secure)
        .http_only(opts.http_only)
        .expires(expires);

    if let Some(domain) = cookie_domain(opts, request_host) {
        builder = builder.domain(domain);
    }
    if let Some(same_site) = opts.parsed_same_site() {
        builder = builder.same_site(same_site);
    }

    builder.build()
}

/// Build a cookie that instructs the browser to drop `name`.
pub fn make_expired_cookie(
    opts: &CookieOptions,
    request_host: &str,
    name: &str,
) -> Cookie<'static> {
    let mut cookie = make_cookie(opts, request_host, name, "", std::time::Duration::ZERO);
    cookie.set_expires(OffsetDateTime::now_utc() - CookieDuration::hours(1));
    cookie
}

/// Append a Set-Cookie header to a response header map.
pub fn set_cookie_header(headers: &mut HeaderMap, cookie: &Cookie<'_>) {
    if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
        headers.append(SET_COOKIE, value);
    }
}

/// Read a cookie value out of a request's `Cookie` header(s).
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let raw = header.to_str().ok()?;
        for parsed in Cookie::split_parse(raw.to_string()).flatten() {
            if parsed.name() == name {
                return Some(parsed.value().to_string());
            }
        }
    }
    None
}
