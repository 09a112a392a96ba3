// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP serving edge.
//!
//! A thin wrapper around **hyper-util**: owns the listening socket,
//! translates between Hyper's body types and the internal
//! [`ProxyRequest`] / [`ProxyResponse`], and maps [`ProxyError`]s onto
//! status codes.  `hyper_util::server::conn::auto` handles HTTP/1.1
//! and HTTP/2 on the same port.
//!
//! Inbound bodies stream straight through to the upstream; request
//! cancellation (client disconnect) drops the task and with it any
//! in-flight provider call.


mod health;

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use log::{debug, error, info, warn};
use reqwest::Body;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::sync::{oneshot, RwLock};
use tokio::task::{Id, JoinSet};

use crate::core::{HttpMethod, ProxyError, ProxyRequest, ProxyResponse, RequestScope};
use crate::proxy::AuthProxy;
use health::HealthServer;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Port for the liveness/readiness listener; 0 disables it.
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4180
}

fn default_health_port() -> u16 {
    4181
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            health_port: default_health_port(),
        }
    }
}

/// The front-end server: accepts connections and hands requests to the
/// [`AuthProxy`].
#[derive(Debug, Clone)]
pub struct ProxyServer {
    config: ServerConfig,
    proxy: Arc<AuthProxy>,
    shutdown_senders: Arc<RwLock<HashMap<Id, oneshot::Sender<()>>>>,
}

impl ProxyServer {
    pub fn new(config: ServerConfig, proxy: Arc<AuthProxy>) -> Self {
        Self {
            config,
            proxy,
            shutdown_senders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Serve until SIGINT/SIGTERM, then drain connections gracefully.
    pub async fn start(&self) -> Result<(), ProxyError> {
        let addr = format!("{}:{}", self.config.host, self.config.port)
            .parse::<SocketAddr>()
            .map_err(|e| ProxyError::Other(format!("invalid server address: {e}")))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Other(format!("failed to bind {addr}: {e}")))?;

        info!("gatehouse listening on http://{addr}");

        let health_server = if self.config.health_port > 0 {
            let server = HealthServer::spawn(self.config.health_port);
            server.set_ready();
            Some(server)
        } else {
            None
        };

        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let mut term_stream = signal(SignalKind::terminate())
            .map_err(|e| ProxyError::Other(format!("cannot install SIGTERM handler: {e}")))?;
        #[cfg(unix)]
        let sigterm = term_stream.recv();
        #[cfg(not(unix))]
        let sigterm = std::future::pending::<Option<()>>();

        tokio::pin!(ctrl_c);
        tokio::pin!(sigterm);

        let shutdown_senders = self.shutdown_senders.clone();
        let shutdown_initiated = Arc::new(AtomicBool::new(false));
        let mut join_set = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("received Ctrl-C; initiating graceful shutdown");
                    shutdown_initiated.store(true, Ordering::SeqCst);
                    break;
                }
                _ = &mut sigterm => {
                    info!("received SIGTERM; initiating graceful shutdown");
                    shutdown_initiated.store(true, Ordering::SeqCst);
                    break;
                }
                accept = listener.accept() => {
                    let (stream, remote_addr) = match accept {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    if shutdown_initiated.load(Ordering::SeqCst) {
                        continue;
                    }

                    let proxy = self.proxy.clone();
                    let (tx, rx) = oneshot::channel();

                    let handle = join_set.spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            handle_request(req, proxy.clone(), remote_addr)
                        });
                        let io = TokioIo::new(stream);

                        let builder = {
                            let mut b = AutoBuilder::new(TokioExecutor::new());
                            b.http1();
                            b.http2();
                            b
                        };
                        let connection = builder.serve_connection(io, service);

                        tokio::select! {
                            result = connection => {
                                if let Err(e) = result {
                                    debug!("connection ended with error: {e}");
                                }
                            }
                            _ = rx => {
                                debug!("connection received shutdown signal");
                            }
                        }
                    });

                    shutdown_senders.write().await.insert(handle.id(), tx);
                }
            }
        }

        if let Some(health) = &health_server {
            health.set_not_ready();
        }

        info!("shutting down; waiting for {} connection(s)", join_set.len());
        {
            let mut senders = shutdown_senders.write().await;
            for (_, sender) in senders.drain() {
                let _ = sender.send(());
            }
        }

        let drain = async {
            while let Some(result) = join_set.join_next().await {
                if let Err(e) = result {
                    error!("connection task failed: {e}");
                }
            }
        };
        let shutdown_timeout = std::time::Duration::from_secs(30);
        match tokio::time::timeout(shutdown_timeout, drain).await {
            Ok(_) => info!("all connections drained"),
            Err(_) => warn!(
                "shutdown timed out after {}s",
                shutdown_timeout.as_secs()
            ),
        }

        Ok(())
    }
}

/// Hyper request → [`ProxyRequest`].
fn convert_hyper_request(req: Request<Incoming>, remote_addr: SocketAddr) -> ProxyRequest {
    let method = HttpMethod::from(req.method());
    let uri = req.uri().clone();
    let path = uri.path().to_owned();
    let query = uri.query().map(str::to_owned);

    // HTTP/1.1 carries the host in the Host header, HTTP/2 in the
    // :authority pseudo-header which hyper exposes on the URI.
    let host = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();

    let headers = req.headers().clone();

    let hyper_stream = req.into_body().into_data_stream();
    let body = Body::wrap_stream(hyper_stream.map_ok(Bytes::from));

    ProxyRequest {
        method,
        path,
        query,
        host,
        headers,
        body,
        scope: Arc::new(tokio::sync::RwLock::new(RequestScope {
            remote_addr: Some(remote_addr.to_string()),
            start_time: Some(Instant::now()),
            session: None,
        })),
    }
}

/// [`ProxyResponse`] → hyper response.
fn convert_proxy_response(resp: ProxyResponse) -> Result<Response<Body>, ProxyError> {
    let stream = resp
        .body
        .into_data_stream()
        .map_err(|e| std::io::Error::other(e.to_string()));
    let body = Body::wrap_stream(stream);

    let mut builder = Response::builder().status(resp.status);
    match builder.headers_mut() {
        Some(headers) => *headers = resp.headers,
        None => return Err(ProxyError::Other("unable to set headers".to_string())),
    }

    builder
        .body(body)
        .map_err(|e| ProxyError::Other(e.to_string()))
}

async fn handle_request(
    req: Request<Incoming>,
    proxy: Arc<AuthProxy>,
    remote_addr: SocketAddr,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    debug!("received request: {method} {path} from {remote_addr}");

    let proxy_req = convert_hyper_request(req, remote_addr);
    let result = proxy.serve(proxy_req).await;

    let response = match result {
        Ok(proxy_resp) => {
            debug!("{method} {path} -> {}", proxy_resp.status);
            convert_proxy_response(proxy_resp).unwrap_or_else(|e| {
                error!("failed to convert response for {method} {path}: {e}");
                plain_response(500, "Internal Server Error")
            })
        }
        Err(e) => {
            let (status, message): (u16, &str) = match &e {
                ProxyError::Timeout(d) => {
                    warn!("{method} {path} timed out after {d:?}");
                    (504, "Gateway Timeout")
                }
                ProxyError::ClientError(err) => {
                    error!("upstream error for {method} {path}: {err}");
                    (502, "Bad Gateway")
                }
                ProxyError::ProviderError(err) => {
                    error!("provider error for {method} {path}: {err}");
                    (502, "Bad Gateway")
                }
                // The handlers turn this into a page or 401 themselves;
                // reaching here is a routing bug, not a user error.
                ProxyError::NeedsLogin => (401, "Unauthorized"),
                _ => {
                    error!("internal error for {method} {path}: {e}");
                    (500, "Internal Server Error")
                }
            };
            plain_response(status, message)
        }
    };

    Ok(response)
}

fn plain_response(status: u16, message: &str) -> Response<Body> {
    // Static statuses and bodies; the builder cannot fail on them.
    Response::builder()
        .status(status)
        .body(Body::from(message.to_string()))
        .expect("static response")
}
