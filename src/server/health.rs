// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Liveness/readiness listener on its own port, so orchestrators can
//! probe the proxy without passing through the auth pipeline.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct HealthServer {
    is_ready: Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

impl HealthServer {
    pub fn spawn(port: u16) -> Self {
        let is_ready = Arc::new(AtomicBool::new(false));
        let ready = is_ready.clone();

        let handle = tokio::spawn(async move {
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("health listener bind failed on {addr}: {e}");
                    return;
                }
            };

            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("health listener accept failed: {e}");
                        continue;
                    }
                };

                let ready = ready.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let ready = ready.clone();
                        async move {
                            let response = match req.uri().path() {
                                "/health" => status_response(200, "OK"),
                                "/ready" => {
                                    if ready.load(Ordering::Relaxed) {
                                        status_response(200, "READY")
                                    } else {
                                        status_response(503, "NOT READY")
                                    }
                                }
                                _ => status_response(404, "Not Found"),
                            };
                            Ok::<_, std::convert::Infallible>(response)
                        }
                    });

                    let io = TokioIo::new(stream);
                    let builder = hyper_util::server::conn::auto::Builder::new(
                        TokioExecutor::new(),
                    );
                    if let Err(e) = builder.serve_connection(io, service).await {
                        error!("health listener connection error: {e}");
                    }
                });
            }
        });

        Self {
            is_ready,
            _handle: handle,
        }
    }

    pub fn set_ready(&self) {
        self.is_ready.store(true, Ordering::Relaxed);
    }

    pub fn set_not_ready(&self) {
        self.is_ready.store(false, Ordering::Relaxed);
    }
}

fn status_response(status: u16, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response")
}
