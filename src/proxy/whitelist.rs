// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The whitelist gate: which requests bypass authentication entirely.

use regex::Regex;

use crate::core::{HttpMethod, ProxyError, ProxyRequest};
use crate::info_fmt;
use crate::proxy::ip::{real_client_ip, NetSet, RealClientIpHeader};

/// Compiled skip-auth policy.  A whitelisted request goes straight to
/// the upstream (in strip-headers mode when configured).
#[derive(Debug)]
pub struct WhitelistGate {
    skip_auth_preflight: bool,
    patterns: Vec<Regex>,
    trusted_ips: NetSet,
    real_client_ip_header: RealClientIpHeader,
}

impl WhitelistGate {
    pub fn new(
        skip_auth_regex: &[String],
        skip_auth_preflight: bool,
        trusted_ips: NetSet,
        real_client_ip_header: RealClientIpHeader,
    ) -> Result<Self, ProxyError> {
        let mut patterns = Vec::with_capacity(skip_auth_regex.len());
        for raw in skip_auth_regex {
            let compiled = Regex::new(raw).map_err(|e| {
                ProxyError::ConfigError(format!("invalid skip-auth pattern {raw:?}: {e}"))
            })?;
            info_fmt!("Whitelist", "compiled skip-auth pattern => {:?}", raw);
            patterns.push(compiled);
        }

        Ok(Self {
            skip_auth_preflight,
            patterns,
            trusted_ips,
            real_client_ip_header,
        })
    }

    pub fn is_whitelisted_path(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }

    async fn is_trusted_ip(&self, req: &ProxyRequest) -> bool {
        if self.trusted_ips.is_empty() {
            return false;
        }
        match real_client_ip(req, self.real_client_ip_header).await {
            Some(addr) => self.trusted_ips.contains(addr),
            None => false,
        }
    }

    /// The gate itself: preflight, path pattern, or trusted source.
    pub async fn is_whitelisted(&self, req: &ProxyRequest) -> bool {
        let preflight = self.skip_auth_preflight && req.method == HttpMethod::Options;
        preflight || self.is_whitelisted_path(&req.path) || self.is_trusted_ip(req).await
    }
}
