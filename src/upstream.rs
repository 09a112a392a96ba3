// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The reverse-proxy transport: one upstream application behind a
//! shared `reqwest` client.  Bodies stream in both directions; nothing
//! is buffered beyond what the HTTP client needs.

use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use tokio::time::timeout;
use url::Url;

use crate::core::{ProxyError, ProxyRequest, ProxyResponse};
use crate::debug_fmt;

// Connection-scoped headers must not travel to the upstream; the
// client negotiates its own connection.  Host is recomputed from the
// upstream URL.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "host",
];

#[derive(Debug)]
pub struct Upstream {
    base: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl Upstream {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ProxyError> {
        let base = Url::parse(base_url)
            .map_err(|e| ProxyError::ConfigError(format!("invalid upstream URL: {e}")))?;

        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ProxyError::ClientError)?;

        Ok(Self {
            base,
            client,
            timeout,
        })
    }

    fn target_url(&self, req: &ProxyRequest) -> String {
        let mut url = format!(
            "{}{}",
            self.base.as_str().trim_end_matches('/'),
            req.path
        );
        if let Some(query) = &req.query {
            if !query.is_empty() {
                url.push('?');
                url.push_str(query);
            }
        }
        url
    }

    fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
        let mut out = headers.clone();
        for name in HOP_BY_HOP {
            out.remove(name);
        }
        out
    }

    /// Forward the request, returning the upstream's response with a
    /// streaming body.
    pub async fn forward(&self, mut req: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let url = self.target_url(&req);
        let started = Instant::now();

        let builder = self
            .client
            .request(req.method.into(), &url)
            .headers(Self::outbound_headers(&req.headers))
            .body(req.take_body());

        let response = timeout(self.timeout, builder.send())
            .await
            .map_err(|_| ProxyError::Timeout(self.timeout))?
            .map_err(ProxyError::ClientError)?;

        debug_fmt!(
            "Upstream",
            "{} {} -> {} in {:?}",
            req.method,
            req.path,
            response.status(),
            started.elapsed()
        );

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = reqwest::Body::wrap_stream(response.bytes_stream());

        Ok(ProxyResponse {
            status,
            headers,
            body,
            received_at: Some(Instant::now()),
        })
    }
}
