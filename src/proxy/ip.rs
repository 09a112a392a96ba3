// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Real-client-IP resolution and the trusted CIDR set.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::core::{ProxyError, ProxyRequest};
use crate::proxy::redirect::split_host_port;
use crate::warn_fmt;

/// Which request header carries the real client address, when the
/// proxy sits behind another terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RealClientIpHeader {
    /// Trust the transport peer address only.
    #[default]
    None,
    /// `X-Real-IP: 10.0.0.1`
    XRealIp,
    /// `X-Forwarded-For: client, proxy1, proxy2` – first hop wins.
    XForwardedFor,
}

/// A set of trusted networks, compiled at startup.
#[derive(Debug, Clone, Default)]
pub struct NetSet {
    nets: Vec<IpNet>,
}

impl NetSet {
    /// Parse CIDR strings; bare addresses become /32 (or /128) nets.
    /// Any unparsable entry aborts startup.
    pub fn parse(entries: &[String]) -> Result<Self, ProxyError> {
        let mut nets = Vec::with_capacity(entries.len());
        for entry in entries {
            let net = entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                .map_err(|_| {
                    ProxyError::ConfigError(format!("could not parse IP network ({entry})"))
                })?;
            nets.push(net);
        }
        Ok(Self { nets })
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.nets.iter().any(|net| net.contains(&addr))
    }
}

/// Resolve the client address: configured header first, transport
/// address as the fallback.  An unparsable header is treated as
/// possibly spoofed and yields nothing rather than the fallback.
pub async fn real_client_ip(
    req: &ProxyRequest,
    header: RealClientIpHeader,
) -> Option<IpAddr> {
    let from_header = match header {
        RealClientIpHeader::None => None,
        RealClientIpHeader::XRealIp => req.header("x-real-ip").map(str::trim),
        RealClientIpHeader::XForwardedFor => req
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim),
    };

    if let Some(raw) = from_header {
        return match raw.parse::<IpAddr>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                warn_fmt!("ClientIp", "unparsable client IP header value {:?}", raw);
                None
            }
        };
    }

    let remote = req.remote_addr().await?;
    let (host, _) = split_host_port(&remote);
    host.parse::<IpAddr>().ok()
}
