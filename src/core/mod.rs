// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core primitives – requests, responses and the per-request scope.
//!
//! Everything that physically moves through the proxy is defined in this
//! module.  No authentication logic lives here; that sits in `auth`
//! (session resolution) and `proxy` (handlers).  The serving edge
//! (`server`) translates between Hyper types and these.


use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{fmt, mem};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::session::SessionState;

/// Errors that can occur while servicing a request or starting the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Outbound HTTP error (upstream forward, token endpoint, JWKS…)
    #[error("HTTP client error: {0}")]
    ClientError(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Upstream did not answer in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error (startup only)
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Session could not be serialized, persisted or cleared
    #[error("session error: {0}")]
    SessionError(String),

    /// The identity provider misbehaved
    #[error("provider error: {0}")]
    ProviderError(#[from] crate::provider::ProviderError),

    /// Sentinel: the caller must be sent through the sign-in flow.
    /// Never escapes the proxy handlers as an HTTP 5xx.
    #[error("redirect to login page")]
    NeedsLogin,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<crate::config::error::ConfigError> for ProxyError {
    fn from(err: crate::config::error::ConfigError) -> Self {
        ProxyError::ConfigError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for ProxyError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        ProxyError::SessionError(e.to_string())
    }
}

/// HTTP methods understood by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Trace,
    Connect,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
            HttpMethod::Head => write!(f, "HEAD"),
            HttpMethod::Options => write!(f, "OPTIONS"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Trace => write!(f, "TRACE"),
            HttpMethod::Connect => write!(f, "CONNECT"),
        }
    }
}

impl From<&reqwest::Method> for HttpMethod {
    fn from(method: &reqwest::Method) -> Self {
        match *method {
            reqwest::Method::GET => HttpMethod::Get,
            reqwest::Method::POST => HttpMethod::Post,
            reqwest::Method::PUT => HttpMethod::Put,
            reqwest::Method::DELETE => HttpMethod::Delete,
            reqwest::Method::HEAD => HttpMethod::Head,
            reqwest::Method::OPTIONS => HttpMethod::Options,
            reqwest::Method::PATCH => HttpMethod::Patch,
            reqwest::Method::TRACE => HttpMethod::Trace,
            reqwest::Method::CONNECT => HttpMethod::Connect,
            _ => HttpMethod::Get,
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Trace => reqwest::Method::TRACE,
            HttpMethod::Connect => reqwest::Method::CONNECT,
        }
    }
}

/// An inbound HTTP request travelling through the proxy.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Option<String>,
    /// Host the client addressed (Host header / :authority), used for
    /// cookie-domain selection and the OAuth2 redirect URI.
    pub host: String,
    pub headers: reqwest::header::HeaderMap,
    pub body: reqwest::Body,
    pub scope: Arc<RwLock<RequestScope>>,
}

impl ProxyRequest {
    /// Take the streaming body out, leaving an empty one behind.
    pub fn take_body(&mut self) -> reqwest::Body {
        mem::replace(&mut self.body, reqwest::Body::from(""))
    }

    /// First value of a header, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Request path plus query string, as the client sent it.
    pub fn request_uri(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }

    /// Read the resolved session out of the request scope, cloning it.
    pub async fn session(&self) -> Option<SessionState> {
        self.scope.read().await.session.clone()
    }

    /// Attach a session to the request scope.
    pub async fn set_session(&self, session: SessionState) {
        self.scope.write().await.session = Some(session);
    }

    /// Transport remote address as recorded by the server.
    pub async fn remote_addr(&self) -> Option<String> {
        self.scope.read().await.remote_addr.clone()
    }
}

impl Clone for ProxyRequest {
    fn clone(&self) -> Self {
        // A streaming body can't be duplicated.  Clones get an empty one.
        Self {
            method: self.method,
            path: self.path.clone(),
            query: self.query.clone(),
            host: self.host.clone(),
            headers: self.headers.clone(),
            body: reqwest::Body::from(""),
            scope: self.scope.clone(),
        }
    }
}

/// An HTTP response on its way back to the client.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub body: reqwest::Body,
    /// When the upstream answered, for timing logs; `None` for responses
    /// the proxy generated itself.
    pub received_at: Option<Instant>,
}

impl ProxyResponse {
    /// Build a response from a fully materialized body.
    pub fn new<B: Into<reqwest::Body>>(
        status: u16,
        headers: reqwest::header::HeaderMap,
        body: B,
    ) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            received_at: None,
        }
    }
}

/// Per-request record shared by the session loaders and the handlers.
///
/// Created once when the request enters the server and mutated only
/// through the `RwLock`; there is no other cross-request mutable state
/// in the core.
#[derive(Debug, Default)]
pub struct RequestScope {
    /// Transport-level peer address, before any forwarded-for parsing
    pub remote_addr: Option<String>,
    /// When the request entered the proxy
    pub start_time: Option<Instant>,
    /// The session resolved by the loader chain, if any
    pub session: Option<SessionState>,
}
