// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Open-redirect defense.
//!
//! [`is_valid_redirect`] is the single gate every post-auth redirect
//! passes through: `/start`, `/callback`, `/sign_out` and the sign-in
//! page all funnel their destinations here.  It is deliberately a pure
//! function over the whitelist so it can be table-tested exhaustively.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::debug_fmt;

// Matches the browser-normalization tricks that turn a "relative" path
// into a cross-origin navigation: //, /\, both with whitespace between
// (e.g. "/ /"), and dot segments like /./ or /../ between separators.
static INVALID_REDIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/\\](?:[\s]*|\.{1,2})[/\\]").expect("static pattern"));

/// Is `redirect` a safe destination under `whitelist_domains`?
///
/// Safe means: a path-absolute URL free of scheme-relative and
/// dot-segment tricks, or an absolute http(s) URL whose host matches a
/// whitelist entry.  Whitelist entries support a leading `.` for
/// subdomain matches and an optional `:port` / `:*` suffix.
pub fn is_valid_redirect(redirect: &str, whitelist_domains: &[String]) -> bool {
    if redirect.is_empty() {
        // No destination given; callers fall back to "/".
        return false;
    }

    if redirect.starts_with('/') {
        return !redirect.starts_with("//") && !INVALID_REDIRECT.is_match(redirect);
    }

    if redirect.starts_with("http://") || redirect.starts_with("https://") {
        let Ok(redirect_url) = Url::parse(redirect) else {
            debug_fmt!("Redirect", "rejecting unparsable redirect {:?}", redirect);
            return false;
        };
        let Some(redirect_host) = redirect_url.host_str() else {
            return false;
        };
        let redirect_port = redirect_url.port().map(|p| p.to_string());

        for domain in whitelist_domains {
            let (domain_host, domain_port) = split_host_port(domain.trim_start_matches('.'));
            if domain_host.is_empty() {
                continue;
            }

            let host_matches = redirect_host == domain_host
                || (domain.starts_with('.')
                    && redirect_host.ends_with(&format!(".{domain_host}")));
            if !host_matches {
                continue;
            }

            // "*" admits any port, a concrete port must match exactly,
            // and no port on the entry means no explicit port allowed.
            let port_matches = match (domain_port, redirect_port.as_deref()) {
                ("*", _) => true,
                (want, Some(got)) => want == got,
                ("", None) => true,
                (_, None) => false,
            };
            if port_matches {
                return true;
            }
        }

        debug_fmt!(
            "Redirect",
            "rejecting redirect {:?}: domain/port not in whitelist",
            redirect
        );
        return false;
    }

    debug_fmt!(
        "Redirect",
        "rejecting redirect {:?}: not an absolute or relative URL",
        redirect
    );
    false
}

/// Separate host and port without validating the host.  Per RFC 3986
/// the port must be numeric; `*` is additionally accepted so whitelist
/// entries can write `example.com:*`.  IPv6 literals keep their
/// brackets stripped.
pub fn split_host_port(hostport: &str) -> (&str, &str) {
    let mut host = hostport;
    let mut port = "";

    if let Some(colon) = host.rfind(':') {
        if valid_optional_port(&host[colon..]) {
            port = &host[colon + 1..];
            host = &host[..colon];
        }
    }

    if host.starts_with('[') && host.ends_with(']') {
        host = &host[1..host.len() - 1];
    }

    (host, port)
}

// ":" followed by digits only, or ":*", or the empty string.
fn valid_optional_port(port: &str) -> bool {
    if port.is_empty() || port == ":*" {
        return true;
    }
    let Some(digits) = port.strip_prefix(':') else {
        return false;
    };
    digits.bytes().all(|b| b.is_ascii_digit())
}
