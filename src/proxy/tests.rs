// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION, SET_COOKIE};
use tokio::sync::RwLock;
use url::Url;

use super::*;
use crate::core::{HttpMethod, RequestScope};
use crate::options::Options;
use crate::session::MemorySessionStore;

/* ---------- test doubles ---------- */

#[derive(Debug, Default)]
struct MockProvider {
    redeem_session: Option<SessionState>,
    redeems: AtomicUsize,
}

impl MockProvider {
    fn redeeming(session: SessionState) -> Self {
        Self {
            redeem_session: Some(session),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "Mock IdP"
    }

    fn login_url(&self, redirect_uri: &str, state: &str) -> String {
        let mut url = Url::parse("https://idp.test/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);
        url.to_string()
    }

    async fn redeem(
        &self,
        _redirect_uri: &str,
        code: &str,
    ) -> Result<SessionState, ProviderError> {
        self.redeems.fetch_add(1, Ordering::SeqCst);
        match (&self.redeem_session, code) {
            (Some(session), "GOOD") => Ok(session.clone()),
            _ => Err(ProviderError::TokenEndpoint("bad code".to_string())),
        }
    }
}

/* ---------- harness ---------- */

fn test_options(upstream: &str) -> Options {
    let mut options: Options = serde_json::from_value(serde_json::json!({
        "upstream": upstream,
        "email_domains": ["*"],
        "session_store": "memory",
        "cookie": {
            "name": "_gatehouse",
            "secure": false,
            "same_site": "lax"
        },
    }))
    .unwrap();
    options.headers.basic_auth_password = "pw".to_string();
    options
}

struct Harness {
    proxy: AuthProxy,
    store: Arc<MemorySessionStore>,
    provider: Arc<MockProvider>,
}

fn harness_with(options: Options, provider: MockProvider) -> Harness {
    let opts = Arc::new(options);
    let store = Arc::new(MemorySessionStore::new(opts.cookie.clone()));
    let provider = Arc::new(provider);
    let proxy = AuthProxy::new(opts, provider.clone(), store.clone(), Vec::new()).unwrap();
    Harness {
        proxy,
        store,
        provider,
    }
}

fn harness() -> Harness {
    harness_with(test_options("http://127.0.0.1:1"), MockProvider::default())
}

fn request(method: HttpMethod, path_and_query: &str) -> ProxyRequest {
    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (path_and_query.to_string(), None),
    };
    ProxyRequest {
        method,
        path,
        query,
        host: "app.example.com".to_string(),
        headers: HeaderMap::new(),
        body: reqwest::Body::from(""),
        scope: Arc::new(RwLock::new(RequestScope {
            remote_addr: Some("203.0.113.7:55000".to_string()),
            ..RequestScope::default()
        })),
    }
}

fn with_header(mut req: ProxyRequest, name: &'static str, value: &str) -> ProxyRequest {
    req.headers
        .insert(name, HeaderValue::from_str(value).unwrap());
    req
}

fn set_cookies(response: &ProxyResponse) -> Vec<(String, String)> {
    response
        .headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| {
            let parsed = cookie::Cookie::parse(v.to_str().ok()?.to_string()).ok()?;
            Some((parsed.name().to_string(), parsed.value().to_string()))
        })
        .collect()
}

fn cookie_value(response: &ProxyResponse, name: &str) -> Option<String> {
    set_cookies(response)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
}

fn location(response: &ProxyResponse) -> String {
    response
        .headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn body_string(response: ProxyResponse) -> String {
    let bytes = response.body.collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Seed a session into the store, returning the Cookie header value
/// the browser would present.
async fn seeded_session_cookie(harness: &Harness, session: &SessionState) -> String {
    let mut headers = HeaderMap::new();
    let req = request(HttpMethod::Get, "/");
    harness
        .store
        .save(&req, &mut headers, session)
        .await
        .unwrap();
    let raw = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
    let parsed = cookie::Cookie::parse(raw.to_string()).unwrap();
    format!("{}={}", parsed.name(), parsed.value())
}

fn oauth_session() -> SessionState {
    SessionState {
        user: "a".to_string(),
        email: "a@b".to_string(),
        access_token: "at".to_string(),
        id_token: "idt".to_string(),
        created_on: Some(chrono::Utc::now()),
        expires_on: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        ..SessionState::default()
    }
}

/// A tiny upstream that answers every request with its received
/// headers as a JSON object.
async fn spawn_echo_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = hyper::service::service_fn(
                    |req: hyper::Request<hyper::body::Incoming>| async move {
                        let mut echoed = serde_json::Map::new();
                        for (name, value) in req.headers() {
                            echoed.insert(
                                name.as_str().to_string(),
                                serde_json::Value::String(
                                    value.to_str().unwrap_or_default().to_string(),
                                ),
                            );
                        }
                        let body = serde_json::Value::Object(echoed).to_string();
                        Ok::<_, std::convert::Infallible>(hyper::Response::new(Full::new(
                            Bytes::from(body),
                        )))
                    },
                );
                let io = hyper_util::rt::TokioIo::new(stream);
                let _ = hyper_util::server::conn::auto::Builder::new(
                    hyper_util::rt::TokioExecutor::new(),
                )
                .serve_connection(io, service)
                .await;
            });
        }
    });

    format!("http://{addr}")
}

/* ---------- /start (scenario: nonce + state) ---------- */

#[tokio::test]
async fn start_issues_csrf_cookie_bound_to_state() {
    let h = harness();
    let response = h
        .proxy
        .serve(request(HttpMethod::Get, "/oauth2/start?rd=/dashboard"))
        .await
        .unwrap();

    assert_eq!(response.status, 302);

    let csrf = cookie_value(&response, "_gatehouse_csrf").expect("csrf cookie issued");
    assert!(csrf.len() >= 32, "nonce is high-entropy: {csrf:?}");
    // No session cookie yet.
    assert!(cookie_value(&response, "_gatehouse").is_none());

    let login = Url::parse(&location(&response)).unwrap();
    let params: HashMap<_, _> = login.query_pairs().into_owned().collect();
    assert_eq!(params["state"], format!("{csrf}:/dashboard"));
    assert_eq!(
        params["redirect_uri"],
        "http://app.example.com/oauth2/callback"
    );
}

#[tokio::test]
async fn start_rejects_unsafe_redirects() {
    let h = harness();
    let response = h
        .proxy
        .serve(request(HttpMethod::Get, "/oauth2/start?rd=//evil.com"))
        .await
        .unwrap();

    let csrf = cookie_value(&response, "_gatehouse_csrf").unwrap();
    let login = Url::parse(&location(&response)).unwrap();
    let params: HashMap<_, _> = login.query_pairs().into_owned().collect();
    // The unsafe destination collapsed to "/".
    assert_eq!(params["state"], format!("{csrf}:/"));
}

#[tokio::test]
async fn redirect_header_loses_to_rd_parameter() {
    let h = harness();
    let req = with_header(
        request(HttpMethod::Get, "/oauth2/start?rd=/from-rd"),
        "x-auth-request-redirect",
        "/from-header",
    );
    let response = h.proxy.serve(req).await.unwrap();
    let login = Url::parse(&location(&response)).unwrap();
    let state = login
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert!(state.ends_with(":/from-rd"), "{state}");
}

/* ---------- /callback (scenarios 3-5) ---------- */

#[tokio::test]
async fn callback_with_matching_nonce_saves_session_and_redirects() {
    let h = harness_with(
        test_options("http://127.0.0.1:1"),
        MockProvider::redeeming(oauth_session()),
    );

    let req = with_header(
        request(
            HttpMethod::Get,
            "/oauth2/callback?code=GOOD&state=N:/dashboard",
        ),
        "cookie",
        "_gatehouse_csrf=N",
    );
    let response = h.proxy.serve(req).await.unwrap();

    assert_eq!(response.status, 302);
    assert_eq!(location(&response), "/dashboard");

    // CSRF cookie cleared, session cookie set.
    assert_eq!(cookie_value(&response, "_gatehouse_csrf"), Some(String::new()));
    let ticket = cookie_value(&response, "_gatehouse").expect("session cookie set");
    assert!(!ticket.is_empty());
}

#[tokio::test]
async fn callback_with_wrong_nonce_is_denied() {
    let h = harness_with(
        test_options("http://127.0.0.1:1"),
        MockProvider::redeeming(oauth_session()),
    );

    let req = with_header(
        request(
            HttpMethod::Get,
            "/oauth2/callback?code=GOOD&state=N:/dashboard",
        ),
        "cookie",
        "_gatehouse_csrf=WRONG",
    );
    let response = h.proxy.serve(req).await.unwrap();

    assert_eq!(response.status, 403);
    // Cleared regardless of the mismatch.
    assert_eq!(cookie_value(&response, "_gatehouse_csrf"), Some(String::new()));
    assert!(cookie_value(&response, "_gatehouse").is_none());

    let body = body_string(response).await;
    assert!(body.contains("Permission Denied"));
    assert!(body.contains("csrf failed"));
}

#[tokio::test]
async fn callback_without_csrf_cookie_is_denied() {
    let h = harness_with(
        test_options("http://127.0.0.1:1"),
        MockProvider::redeeming(oauth_session()),
    );
    let response = h
        .proxy
        .serve(request(
            HttpMethod::Get,
            "/oauth2/callback?code=GOOD&state=N:/dashboard",
        ))
        .await
        .unwrap();
    assert_eq!(response.status, 403);
}

#[tokio::test]
async fn callback_provider_error_short_circuits_redemption() {
    let h = harness();
    let response = h
        .proxy
        .serve(request(
            HttpMethod::Get,
            "/oauth2/callback?error=access_denied&state=N:/x",
        ))
        .await
        .unwrap();

    assert_eq!(response.status, 403);
    assert_eq!(h.provider.redeems.load(Ordering::SeqCst), 0);
    assert!(body_string(response).await.contains("access_denied"));
}

#[tokio::test]
async fn callback_with_malformed_state_is_an_internal_error() {
    let h = harness_with(
        test_options("http://127.0.0.1:1"),
        MockProvider::redeeming(oauth_session()),
    );
    let req = with_header(
        request(HttpMethod::Get, "/oauth2/callback?code=GOOD&state=nodelim"),
        "cookie",
        "_gatehouse_csrf=nodelim",
    );
    let response = h.proxy.serve(req).await.unwrap();
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn callback_unsafe_state_redirect_collapses_to_root() {
    let h = harness_with(
        test_options("http://127.0.0.1:1"),
        MockProvider::redeeming(oauth_session()),
    );
    let req = with_header(
        request(
            HttpMethod::Get,
            "/oauth2/callback?code=GOOD&state=N://evil.com",
        ),
        "cookie",
        "_gatehouse_csrf=N",
    );
    let response = h.proxy.serve(req).await.unwrap();
    assert_eq!(response.status, 302);
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn callback_rejected_by_email_policy_is_invalid_account() {
    let mut options = test_options("http://127.0.0.1:1");
    options.email_domains = vec!["allowed.example".to_string()];
    let h = harness_with(options, MockProvider::redeeming(oauth_session()));

    let req = with_header(
        request(
            HttpMethod::Get,
            "/oauth2/callback?code=GOOD&state=N:/dashboard",
        ),
        "cookie",
        "_gatehouse_csrf=N",
    );
    let response = h.proxy.serve(req).await.unwrap();

    assert_eq!(response.status, 403);
    assert!(cookie_value(&response, "_gatehouse").is_none());
    assert!(body_string(response).await.contains("Invalid Account"));
}

#[tokio::test]
async fn callback_redemption_failure_is_an_internal_error() {
    let h = harness(); // provider has no session to redeem
    let req = with_header(
        request(HttpMethod::Get, "/oauth2/callback?code=BAD&state=N:/x"),
        "cookie",
        "_gatehouse_csrf=N",
    );
    let response = h.proxy.serve(req).await.unwrap();
    assert_eq!(response.status, 500);
    assert_eq!(h.provider.redeems.load(Ordering::SeqCst), 1);
}

/* ---------- sign_out ---------- */

#[tokio::test]
async fn sign_out_clears_the_session_and_redirects() {
    let h = harness();
    let session_cookie = seeded_session_cookie(&h, &oauth_session()).await;

    let req = with_header(
        request(HttpMethod::Get, "/oauth2/sign_out?rd=/bye"),
        "cookie",
        &session_cookie,
    );
    let response = h.proxy.serve(req).await.unwrap();

    assert_eq!(response.status, 302);
    assert_eq!(location(&response), "/bye");
    assert_eq!(cookie_value(&response, "_gatehouse"), Some(String::new()));

    // The stored session is gone: the next request needs login.
    let req = with_header(request(HttpMethod::Get, "/app"), "cookie", &session_cookie);
    let response = h.proxy.serve(req).await.unwrap();
    assert_eq!(response.status, 403);
}

/* ---------- /auth and /userinfo (scenario 7) ---------- */

#[tokio::test]
async fn auth_endpoint_answers_401_then_202() {
    let mut options = test_options("http://127.0.0.1:1");
    options.headers.set_xauthrequest = true;
    let h = harness_with(options, MockProvider::default());

    let response = h
        .proxy
        .serve(request(HttpMethod::Get, "/oauth2/auth"))
        .await
        .unwrap();
    assert_eq!(response.status, 401);

    let session_cookie = seeded_session_cookie(&h, &oauth_session()).await;
    let req = with_header(
        request(HttpMethod::Get, "/oauth2/auth"),
        "cookie",
        &session_cookie,
    );
    let response = h.proxy.serve(req).await.unwrap();

    assert_eq!(response.status, 202);
    assert_eq!(response.headers.get("x-auth-request-user").unwrap(), "a");
    assert_eq!(response.headers.get("x-auth-request-email").unwrap(), "a@b");
    assert_eq!(response.headers.get("gap-auth").unwrap(), "a@b");
    // The WebSocket cookie rides along.
    assert_eq!(
        cookie_value(&response, "X-Authorization"),
        Some("idt".to_string())
    );
}

#[tokio::test]
async fn userinfo_renders_json_or_401() {
    let h = harness();

    let response = h
        .proxy
        .serve(request(HttpMethod::Get, "/oauth2/userinfo"))
        .await
        .unwrap();
    assert_eq!(response.status, 401);

    let session_cookie = seeded_session_cookie(&h, &oauth_session()).await;
    let req = with_header(
        request(HttpMethod::Get, "/oauth2/userinfo"),
        "cookie",
        &session_cookie,
    );
    let response = h.proxy.serve(req).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(
        response.headers.get(CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["email"], "a@b");
    // Empty preferred username is omitted, not null.
    assert!(body.get("preferredUsername").is_none());
}

/* ---------- routing details ---------- */

#[tokio::test]
async fn robots_txt_disallows_everything() {
    let h = harness();
    let response = h
        .proxy
        .serve(request(HttpMethod::Get, "/robots.txt"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(body_string(response).await, "User-agent: *\nDisallow: /");
}

#[tokio::test]
async fn proxy_prefix_paths_carry_the_no_cache_triplet() {
    let h = harness();
    let response = h
        .proxy
        .serve(request(HttpMethod::Get, "/oauth2/sign_in"))
        .await
        .unwrap();

    assert_eq!(
        response.headers.get("cache-control").unwrap(),
        "no-cache, no-store, must-revalidate, max-age=0"
    );
    assert_eq!(response.headers.get("x-accel-expires").unwrap(), "0");
    assert_eq!(
        response.headers.get("expires").unwrap(),
        "Thu, 01 Jan 1970 00:00:00 UTC"
    );

    // /auth is exempt so nginx can cache subrequest answers.
    let response = h
        .proxy
        .serve(request(HttpMethod::Get, "/oauth2/auth"))
        .await
        .unwrap();
    assert!(response.headers.get("cache-control").is_none());
}

#[tokio::test]
async fn unauthenticated_browser_gets_sign_in_page() {
    let h = harness();
    let response = h.proxy.serve(request(HttpMethod::Get, "/app")).await.unwrap();
    assert_eq!(response.status, 403);
    let body = body_string(response).await;
    assert!(body.contains("Sign in with Mock IdP"));
    // The original destination rides in the hidden rd field.
    assert!(body.contains("value=\"/app\""));
}

#[tokio::test]
async fn unauthenticated_api_client_gets_json_401() {
    let h = harness();
    let req = with_header(
        request(HttpMethod::Get, "/api/items"),
        "accept",
        "application/json, text/plain",
    );
    let response = h.proxy.serve(req).await.unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(
        response.headers.get(CONTENT_TYPE).unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn skip_provider_button_goes_straight_to_start() {
    let mut options = test_options("http://127.0.0.1:1");
    options.skip_provider_button = true;
    let h = harness_with(options, MockProvider::default());

    let response = h.proxy.serve(request(HttpMethod::Get, "/app")).await.unwrap();
    assert_eq!(response.status, 302);
    assert!(location(&response).starts_with("https://idp.test/authorize"));
    assert!(cookie_value(&response, "_gatehouse_csrf").is_some());
}

/* ---------- upstream paths (scenarios 6 and 8) ---------- */

#[tokio::test]
async fn authenticated_proxy_projects_identity_headers() {
    let upstream = spawn_echo_upstream().await;
    let mut options = test_options(&upstream);
    options.headers.pass_basic_auth = true;
    options.headers.pass_user_headers = false;
    let h = harness_with(options, MockProvider::default());

    let session = SessionState {
        user: "u".to_string(),
        created_on: Some(chrono::Utc::now()),
        ..SessionState::default()
    };
    let session_cookie = seeded_session_cookie(&h, &session).await;

    let mut req = with_header(request(HttpMethod::Get, "/app"), "cookie", &session_cookie);
    // A spoofed inbound value that must be replaced.
    req.headers
        .insert("x-forwarded-email", HeaderValue::from_static("spoof@evil"));

    let response = h.proxy.serve(req).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.headers.get("gap-auth").unwrap(), "u");

    let seen: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();

    let expected_basic = format!(
        "Basic {}",
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, "u:pw")
    );
    assert_eq!(seen["authorization"], expected_basic);
    assert_eq!(seen["x-forwarded-user"], "u");
    // Empty email: deleted, not inherited from the client.
    assert!(seen.get("x-forwarded-email").is_none());
}

#[tokio::test]
async fn whitelisted_path_strips_identity_headers() {
    let upstream = spawn_echo_upstream().await;
    let mut options = test_options(&upstream);
    options.skip_auth_regex = vec!["^/health$".to_string()];
    options.skip_auth_strip_headers = true;
    let h = harness_with(options, MockProvider::default());

    let req = with_header(
        request(HttpMethod::Get, "/health"),
        "x-forwarded-user",
        "attacker",
    );
    let response = h.proxy.serve(req).await.unwrap();

    assert_eq!(response.status, 200);
    let seen: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert!(seen.get("x-forwarded-user").is_none());
    assert!(seen.get("authorization").is_none());
}

#[tokio::test]
async fn preflight_skips_auth_when_configured() {
    let upstream = spawn_echo_upstream().await;
    let mut options = test_options(&upstream);
    options.skip_auth_preflight = true;
    let h = harness_with(options, MockProvider::default());

    let response = h
        .proxy
        .serve(request(HttpMethod::Options, "/anything"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    // Without the flag the preflight needs a session.
    let h = harness();
    let response = h
        .proxy
        .serve(request(HttpMethod::Options, "/anything"))
        .await
        .unwrap();
    assert_eq!(response.status, 403);
}

#[tokio::test]
async fn trusted_ip_bypasses_authentication() {
    let upstream = spawn_echo_upstream().await;
    let mut options = test_options(&upstream);
    options.trusted_ips = vec!["203.0.113.0/24".to_string()];
    let h = harness_with(options, MockProvider::default());

    // The fixture's transport address is 203.0.113.7.
    let response = h.proxy.serve(request(HttpMethod::Get, "/app")).await.unwrap();
    assert_eq!(response.status, 200);
}

/* ---------- manual sign-in ---------- */

#[tokio::test]
async fn htpasswd_post_mints_a_user_only_session() {
    let htpasswd = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        htpasswd.path(),
        "shauser:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=\n",
    )
    .unwrap();

    let mut options = test_options("http://127.0.0.1:1");
    options.htpasswd_file = htpasswd.path().to_string_lossy().into_owned();
    let h = harness_with(options, MockProvider::default());

    let mut req = request(HttpMethod::Post, "/oauth2/sign_in?rd=/home");
    req.headers.insert(
        "content-type",
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    req.body = reqwest::Body::from("username=shauser&password=password");

    let response = h.proxy.serve(req).await.unwrap();
    assert_eq!(response.status, 302);
    assert_eq!(location(&response), "/home");
    assert!(cookie_value(&response, "_gatehouse").is_some());

    // Wrong password renders the page again, with the htpasswd form.
    let mut req = request(HttpMethod::Post, "/oauth2/sign_in");
    req.headers.insert(
        "content-type",
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    req.body = reqwest::Body::from("username=shauser&password=nope");
    let response = h.proxy.serve(req).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(body_string(response).await.contains("name=\"password\""));
}

/* ---------- session liveness ---------- */

#[tokio::test]
async fn session_failing_the_email_policy_is_cleared() {
    let mut options = test_options("http://127.0.0.1:1");
    options.email_domains = vec!["allowed.example".to_string()];
    let h = harness_with(options, MockProvider::default());

    let mut session = oauth_session();
    session.email = "a@revoked.example".to_string();
    let session_cookie = seeded_session_cookie(&h, &session).await;

    let req = with_header(request(HttpMethod::Get, "/app"), "cookie", &session_cookie);
    let response = h.proxy.serve(req).await.unwrap();

    // Needs login again, and the bad session was cleared.
    assert_eq!(response.status, 403);
    assert!(set_cookies(&response)
        .iter()
        .any(|(name, value)| name == "_gatehouse" && value.is_empty()));
}
