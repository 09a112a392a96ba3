// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The configured policy – one immutable record, built at startup from
//! the `proxy` section of the configuration tree and never mutated at
//! request time.  Heavy artifacts (compiled regexes, the trusted CIDR
//! set, the htpasswd table) are derived from it when the proxy is
//! constructed; a failure there aborts process initialization.

use serde::Deserialize;
use url::Url;

use crate::config::Config;
use crate::cookies::CookieOptions;
use crate::core::ProxyError;
use crate::logging::LoggingConfig;
use crate::provider::{JwtVerifierConfig, OidcProviderConfig};
use crate::proxy::headers::HeaderPolicy;
use crate::proxy::ip::RealClientIpHeader;

fn default_proxy_prefix() -> String {
    "/oauth2".to_string()
}

fn default_session_store() -> String {
    "cookie".to_string()
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    /// URL path prefix reserved for the proxy's own endpoints.
    #[serde(default = "default_proxy_prefix")]
    pub proxy_prefix: String,

    /// Base URL of the upstream application.  Required.
    #[serde(default)]
    pub upstream: String,

    /// Upstream timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Registered OAuth2 redirect URL.  Empty derives scheme and host
    /// from each request.
    #[serde(default)]
    pub redirect_url: String,

    /// Hosts that post-auth redirects may point at (see the redirect
    /// validator for the matching rules).
    #[serde(default)]
    pub whitelist_domains: Vec<String>,

    /// Email domains accepted by the authorization predicate; `*`
    /// accepts every authenticated email, empty accepts none beyond
    /// sessions without an email at all.
    #[serde(default)]
    pub email_domains: Vec<String>,

    /// Paths that bypass authentication.
    #[serde(default)]
    pub skip_auth_regex: Vec<String>,

    /// Let OPTIONS preflights through unauthenticated.
    #[serde(default)]
    pub skip_auth_preflight: bool,

    /// Strip identity headers off whitelisted requests.
    #[serde(default)]
    pub skip_auth_strip_headers: bool,

    /// Accept bearer JWTs from the trusted issuers below.
    #[serde(default)]
    pub skip_jwt_bearer_tokens: bool,

    /// Extra trusted issuers beyond the provider's own.
    #[serde(default)]
    pub extra_jwt_issuers: Vec<JwtVerifierConfig>,

    /// CIDRs whose requests bypass authentication.
    #[serde(default)]
    pub trusted_ips: Vec<String>,

    /// Header carrying the real client address.
    #[serde(default)]
    pub real_client_ip_header: RealClientIpHeader,

    /// htpasswd file enabling the manual sign-in form and basic auth.
    #[serde(default)]
    pub htpasswd_file: String,

    /// Skip the provider-selection page and go straight to `/start`.
    #[serde(default)]
    pub skip_provider_button: bool,

    /// Display name override for the sign-in page.
    #[serde(default)]
    pub provider_name: String,

    /// Trusted HTML fragments for the sign-in page.
    #[serde(default)]
    pub sign_in_message: String,
    #[serde(default)]
    pub footer: String,

    /// "cookie" (encrypted client-side) or "memory" (server-side).
    #[serde(default = "default_session_store")]
    pub session_store: String,

    #[serde(default)]
    pub cookie: CookieOptions,

    #[serde(default)]
    pub headers: HeaderPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// The identity provider.  Required unless every caller arrives
    /// with htpasswd credentials or a trusted bearer token.
    #[serde(default)]
    pub provider: Option<OidcProviderConfig>,
}

impl Default for Options {
    fn default() -> Self {
        // serde's field defaults, via an empty object.
        serde_json::from_value(serde_json::json!({})).expect("defaults are consistent")
    }
}

impl Options {
    /// Read the `proxy` section of the resolved configuration.
    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        let options: Options = config
            .get("proxy")?
            .ok_or_else(|| ProxyError::ConfigError("missing `proxy` section".to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Cheap structural checks.  Everything that needs compilation
    /// (regexes, CIDRs, htpasswd) is built – and therefore re-checked –
    /// when the proxy is constructed.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.upstream.is_empty() {
            return Err(ProxyError::ConfigError(
                "`proxy.upstream` is required".to_string(),
            ));
        }
        Url::parse(&self.upstream)
            .map_err(|e| ProxyError::ConfigError(format!("invalid upstream URL: {e}")))?;

        if !self.proxy_prefix.starts_with('/') {
            return Err(ProxyError::ConfigError(
                "`proxy.proxy_prefix` must start with '/'".to_string(),
            ));
        }

        if !self.redirect_url.is_empty() {
            Url::parse(&self.redirect_url)
                .map_err(|e| ProxyError::ConfigError(format!("invalid redirect_url: {e}")))?;
        }

        match self.session_store.as_str() {
            "cookie" | "memory" => {}
            other => {
                return Err(ProxyError::ConfigError(format!(
                    "unknown session store {other:?} (cookie or memory)"
                )));
            }
        }

        Ok(())
    }

    /// The email authorization predicate from `email_domains`.
    pub fn email_is_allowed(&self, email: &str) -> bool {
        if self.email_domains.iter().any(|d| d == "*") {
            return true;
        }
        let Some((_, domain)) = email.rsplit_once('@') else {
            return false;
        };
        self.email_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
    }
}
