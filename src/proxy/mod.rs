// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The authenticating proxy itself.
//!
//! [`AuthProxy::serve`] is the single entry point: it dispatches to the
//! OAuth2 flow handlers (`/start`, `/callback`, `/sign_in`,
//! `/sign_out`), the integration endpoints (`/auth`, `/userinfo`), or
//! the authenticated upstream path.  Whitelisted requests bypass all of
//! it and go straight to the upstream with identity headers stripped.
//!
//! Handlers build responses; the session loaders and stores only ever
//! append `Set-Cookie` headers onto the response being assembled.

pub mod headers;
pub mod ip;
pub mod pages;
pub mod redirect;
pub mod whitelist;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use http_body_util::BodyExt;
use rand::RngCore;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION};
use serde::Serialize;
use url::Url;

use crate::auth::jwt::BearerIssuer;
use crate::auth::{
    BasicAuthSessionLoader, HtpasswdValidator, JwtSessionLoader, SessionChain,
    StoredSessionLoader,
};
use crate::cookies::{make_cookie, make_expired_cookie, read_cookie, set_cookie_header};
use crate::core::{HttpMethod, ProxyError, ProxyRequest, ProxyResponse};
use crate::logging::audit;
use crate::options::Options;
use crate::provider::{JwtVerifier, Provider, ProviderError};
use crate::proxy::headers::{apply_request_headers, apply_response_headers, strip_request_headers};
use crate::proxy::ip::NetSet;
use crate::proxy::pages::{PageRenderer, ROBOTS_TXT};
use crate::proxy::redirect::is_valid_redirect;
use crate::proxy::whitelist::WhitelistGate;
use crate::session::{SessionState, SessionStore};
use crate::upstream::Upstream;
use crate::{debug_fmt, error_fmt, info_fmt};

const APPLICATION_JSON: &str = "application/json";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const FORM_BODY_LIMIT: usize = 64 * 1024;

// Unix epoch in RFC 1123, for the no-cache triplet.
const EPOCH_RFC1123: &str = "Thu, 01 Jan 1970 00:00:00 UTC";

/// The proxy's own endpoint paths, fixed once the prefix is known.
#[derive(Debug, Clone)]
pub struct ProxyPaths {
    pub robots: String,
    pub sign_in: String,
    pub sign_out: String,
    pub oauth_start: String,
    pub oauth_callback: String,
    pub auth_only: String,
    pub user_info: String,
}

impl ProxyPaths {
    fn new(prefix: &str) -> Self {
        Self {
            robots: "/robots.txt".to_string(),
            sign_in: format!("{prefix}/sign_in"),
            sign_out: format!("{prefix}/sign_out"),
            oauth_start: format!("{prefix}/start"),
            oauth_callback: format!("{prefix}/callback"),
            auth_only: format!("{prefix}/auth"),
            user_info: format!("{prefix}/userinfo"),
        }
    }
}

/// The authenticating reverse proxy.  Immutable once constructed; safe
/// to share across request tasks.
#[derive(Debug)]
pub struct AuthProxy {
    opts: Arc<Options>,
    paths: ProxyPaths,
    provider: Arc<dyn Provider>,
    session_store: Arc<dyn SessionStore>,
    session_chain: SessionChain,
    whitelist: WhitelistGate,
    upstream: Upstream,
    htpasswd: Option<Arc<HtpasswdValidator>>,
    pages: PageRenderer,
    redirect_url: Option<Url>,
}

impl AuthProxy {
    /// Wire the proxy together.  `bearer_issuers` are the trusted
    /// issuers for the JWT loader (typically the provider's own
    /// verifier); the extra issuers from the options are appended.
    /// Every configuration problem surfaces here and aborts startup.
    pub fn new(
        opts: Arc<Options>,
        provider: Arc<dyn Provider>,
        session_store: Arc<dyn SessionStore>,
        mut bearer_issuers: Vec<BearerIssuer>,
    ) -> Result<Self, ProxyError> {
        let trusted_ips = NetSet::parse(&opts.trusted_ips)?;
        let whitelist = WhitelistGate::new(
            &opts.skip_auth_regex,
            opts.skip_auth_preflight,
            trusted_ips,
            opts.real_client_ip_header,
        )?;

        let upstream = Upstream::new(&opts.upstream, opts.timeout_secs)?;

        let htpasswd = if opts.htpasswd_file.is_empty() {
            None
        } else {
            info_fmt!("AuthProxy", "using htpasswd file: {}", opts.htpasswd_file);
            Some(Arc::new(HtpasswdValidator::from_file(&opts.htpasswd_file)?))
        };

        let mut session_chain = SessionChain::new();
        if opts.skip_jwt_bearer_tokens {
            let http = reqwest::Client::new();
            for cfg in &opts.extra_jwt_issuers {
                info_fmt!("AuthProxy", "trusting JWT bearer issuer: {}", cfg.issuer);
                bearer_issuers.push(BearerIssuer {
                    verifier: Arc::new(JwtVerifier::new(cfg.clone(), http.clone())),
                    provider: None,
                });
            }
            if !bearer_issuers.is_empty() {
                session_chain.add(Arc::new(JwtSessionLoader::new(bearer_issuers)));
            }
        }
        if let Some(validator) = &htpasswd {
            session_chain.add(Arc::new(BasicAuthSessionLoader::new(validator.clone())));
        }
        session_chain.add(Arc::new(StoredSessionLoader::new(
            session_store.clone(),
            provider.clone(),
            opts.cookie.refresh(),
        )));

        let redirect_url = if opts.redirect_url.is_empty() {
            None
        } else {
            Some(Url::parse(&opts.redirect_url).map_err(|e| {
                ProxyError::ConfigError(format!("invalid redirect_url: {e}"))
            })?)
        };

        let pages = PageRenderer {
            proxy_prefix: opts.proxy_prefix.clone(),
            provider_name: if opts.provider_name.is_empty() {
                provider.name().to_string()
            } else {
                opts.provider_name.clone()
            },
            sign_in_message: opts.sign_in_message.clone(),
            footer: opts.footer.clone(),
            display_htpasswd_form: htpasswd.is_some(),
        };

        info_fmt!(
            "AuthProxy",
            "cookie settings: name:{} secure:{} httponly:{} expiry:{:?} domains:{} path:{} samesite:{:?} refresh:{:?}",
            opts.cookie.name,
            opts.cookie.secure,
            opts.cookie.http_only,
            opts.cookie.expire(),
            opts.cookie.domains.join(","),
            opts.cookie.path,
            opts.cookie.same_site,
            opts.cookie.refresh()
        );

        Ok(Self {
            paths: ProxyPaths::new(&opts.proxy_prefix),
            opts,
            provider,
            session_store,
            session_chain,
            whitelist,
            upstream,
            htpasswd,
            pages,
            redirect_url,
        })
    }

    pub fn paths(&self) -> &ProxyPaths {
        &self.paths
    }

    /// Route one request.  This is C6: exact-match dispatch on the
    /// proxy's own paths, whitelist gate, then the authenticated
    /// upstream path.
    pub async fn serve(&self, req: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let mut response_headers = HeaderMap::new();
        if req.path != self.paths.auth_only && req.path.starts_with(&self.opts.proxy_prefix) {
            prepare_no_cache(&mut response_headers);
        }

        let path = req.path.clone();
        if path == self.paths.robots {
            return Ok(robots_txt(response_headers));
        }
        if self.whitelist.is_whitelisted(&req).await {
            return self.skip_auth_proxy(req).await;
        }
        if path == self.paths.sign_in {
            self.sign_in(req, response_headers).await
        } else if path == self.paths.sign_out {
            self.sign_out(req, response_headers).await
        } else if path == self.paths.oauth_start {
            self.oauth_start(req, response_headers).await
        } else if path == self.paths.oauth_callback {
            self.oauth_callback(req, response_headers).await
        } else if path == self.paths.auth_only {
            self.auth_only(req, response_headers).await
        } else if path == self.paths.user_info {
            self.user_info(req, response_headers).await
        } else {
            self.proxy(req, response_headers).await
        }
    }

    /* ---------- the OAuth2 flow (C4) ---------- */

    /// `GET /start` – issue the CSRF nonce and bounce to the provider.
    async fn oauth_start(
        &self,
        mut req: ProxyRequest,
        mut response_headers: HeaderMap,
    ) -> Result<ProxyResponse, ProxyError> {
        prepare_no_cache(&mut response_headers);

        let form = match self.parse_form(&mut req).await {
            Ok(form) => form,
            Err(e) => return Ok(self.internal_error(response_headers, &e)),
        };
        let redirect = self.resolve_redirect(&req, &form);
        self.start_flow(&req, response_headers, &redirect)
    }

    /// Shared tail of `/start`: nonce, CSRF cookie, provider redirect.
    fn start_flow(
        &self,
        req: &ProxyRequest,
        mut response_headers: HeaderMap,
        redirect: &str,
    ) -> Result<ProxyResponse, ProxyError> {
        prepare_no_cache(&mut response_headers);

        let nonce = generate_nonce();
        let csrf = make_cookie(
            &self.opts.cookie,
            &req.host,
            &self.opts.cookie.csrf_name(),
            &nonce,
            self.opts.cookie.expire(),
        );
        set_cookie_header(&mut response_headers, &csrf);

        let state = format!("{nonce}:{redirect}");
        let login_url = self
            .provider
            .login_url(&self.redirect_uri(&req.host), &state);

        debug_fmt!("OAuthStart", "redirecting to provider, post-auth target {:?}", redirect);
        Ok(redirect_response(response_headers, &login_url))
    }

    /// `GET /callback` – terminate the authorization-code round-trip.
    async fn oauth_callback(
        &self,
        mut req: ProxyRequest,
        mut response_headers: HeaderMap,
    ) -> Result<ProxyResponse, ProxyError> {
        let remote_addr = req.remote_addr().await;
        let remote = remote_addr.as_deref();

        let form = match self.parse_form(&mut req).await {
            Ok(form) => form,
            Err(e) => return Ok(self.internal_error(response_headers, &e)),
        };

        // The provider reported an error instead of a code; no
        // redemption call is made.
        if let Some(error) = form.get("error").filter(|e| !e.is_empty()) {
            audit::auth_failure("", remote, &format!("provider returned error: {error}"));
            return Ok(self.permission_denied(response_headers, error));
        }

        let code = form.get("code").map(String::as_str).unwrap_or_default();
        let session = match self.redeem_code(&req.host, code).await {
            Ok(session) => session,
            Err(e) => {
                error_fmt!("OAuthCallback", "error redeeming code: {}", e);
                return Ok(self.error_page_response(
                    response_headers,
                    500,
                    "Internal Error",
                    "Internal Error",
                ));
            }
        };

        let state = form.get("state").map(String::as_str).unwrap_or_default();
        let Some((nonce, redirect)) = state.split_once(':') else {
            error_fmt!("OAuthCallback", "invalid state: no nonce delimiter");
            return Ok(self.error_page_response(
                response_headers,
                500,
                "Internal Error",
                "Invalid State",
            ));
        };

        let Some(cookie_nonce) =
            read_cookie(&req.headers, &self.opts.cookie.csrf_name())
        else {
            audit::auth_failure(
                &session.email,
                remote,
                "unable to obtain CSRF cookie during OAuth2 callback",
            );
            return Ok(self.permission_denied(response_headers, "missing CSRF cookie"));
        };

        // The nonce is single-use: gone after this callback either way.
        let expired_csrf = make_expired_cookie(
            &self.opts.cookie,
            &req.host,
            &self.opts.cookie.csrf_name(),
        );
        set_cookie_header(&mut response_headers, &expired_csrf);

        if cookie_nonce != nonce {
            audit::auth_failure(
                &session.email,
                remote,
                "csrf token mismatch, potential attack",
            );
            return Ok(self.permission_denied(response_headers, "csrf failed"));
        }

        let redirect = if is_valid_redirect(redirect, &self.opts.whitelist_domains) {
            redirect
        } else {
            "/"
        };

        if self.opts.email_is_allowed(&session.email)
            && self.provider.validate_group(&session.email)
        {
            audit::auth_success(
                &session.email,
                remote,
                &format!("authenticated via OAuth2: {session}"),
            );
            if let Err(e) = self
                .session_store
                .save(&req, &mut response_headers, &session)
                .await
            {
                error_fmt!("OAuthCallback", "error saving session: {}", e);
                return Ok(self.error_page_response(
                    response_headers,
                    500,
                    "Internal Error",
                    "Internal Error",
                ));
            }
            Ok(redirect_response(response_headers, redirect))
        } else {
            audit::auth_failure(&session.email, remote, "unauthorized account");
            Ok(self.permission_denied(response_headers, "Invalid Account"))
        }
    }

    /// Redeem the code and fill in whatever identity fields the
    /// provider's optional lookups can supply.
    async fn redeem_code(&self, host: &str, code: &str) -> Result<SessionState, ProviderError> {
        if code.is_empty() {
            return Err(ProviderError::MissingCode);
        }

        let redirect_uri = self.redirect_uri(host);
        let mut session = self.provider.redeem(&redirect_uri, code).await?;

        if session.email.is_empty() {
            match self.provider.get_email(&session).await {
                Ok(email) => session.email = email,
                Err(ProviderError::NotImplemented) => {}
                Err(e) => return Err(e),
            }
        }
        if session.preferred_username.is_empty() {
            match self.provider.get_preferred_username(&session).await {
                Ok(preferred) => session.preferred_username = preferred,
                Err(ProviderError::NotImplemented) => {}
                Err(e) => return Err(e),
            }
        }
        if session.user.is_empty() {
            match self.provider.get_user(&session).await {
                Ok(user) => session.user = user,
                Err(ProviderError::NotImplemented) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(session)
    }

    /// `GET|POST /sign_in` – page, or manual htpasswd login.
    async fn sign_in(
        &self,
        mut req: ProxyRequest,
        mut response_headers: HeaderMap,
    ) -> Result<ProxyResponse, ProxyError> {
        let form = match self.parse_form(&mut req).await {
            Ok(form) => form,
            Err(e) => return Ok(self.internal_error(response_headers, &e)),
        };
        let mut redirect = self.resolve_redirect(&req, &form);
        if redirect == self.paths.sign_in {
            redirect = "/".to_string();
        }

        if let Some(user) = self.manual_sign_in(&req, &form).await {
            let session = SessionState::for_user(&user);
            if let Err(e) = self
                .session_store
                .save(&req, &mut response_headers, &session)
                .await
            {
                error_fmt!("SignIn", "error saving session: {}", e);
                return Ok(self.error_page_response(
                    response_headers,
                    500,
                    "Internal Error",
                    "Internal Error",
                ));
            }
            return Ok(redirect_response(response_headers, &redirect));
        }

        if self.opts.skip_provider_button {
            self.start_flow(&req, response_headers, &redirect)
        } else {
            self.sign_in_page(&req, response_headers, 200, &redirect)
                .await
        }
    }

    /// htpasswd form login; `Some(user)` only on success.
    async fn manual_sign_in(
        &self,
        req: &ProxyRequest,
        form: &HashMap<String, String>,
    ) -> Option<String> {
        let validator = self.htpasswd.as_ref()?;
        if req.method != HttpMethod::Post {
            return None;
        }

        let user = form.get("username").map(String::as_str).unwrap_or_default();
        let password = form.get("password").map(String::as_str).unwrap_or_default();
        if user.is_empty() {
            return None;
        }

        let remote = req.remote_addr().await;
        if validator.validate(user, password) {
            audit::auth_success(user, remote.as_deref(), "authenticated via htpasswd file");
            Some(user.to_string())
        } else {
            audit::auth_failure(user, remote.as_deref(), "invalid htpasswd credentials");
            None
        }
    }

    /// `GET /sign_out` – drop the session, redirect.
    async fn sign_out(
        &self,
        mut req: ProxyRequest,
        mut response_headers: HeaderMap,
    ) -> Result<ProxyResponse, ProxyError> {
        let form = match self.parse_form(&mut req).await {
            Ok(form) => form,
            Err(e) => return Ok(self.internal_error(response_headers, &e)),
        };
        let redirect = self.resolve_redirect(&req, &form);

        self.session_store
            .clear(&req, &mut response_headers)
            .await?;
        Ok(redirect_response(response_headers, &redirect))
    }

    /* ---------- integration endpoints (C8) ---------- */

    /// `GET /auth` – 202 with identity response headers, or 401.  For
    /// nginx `auth_request` and friends.
    async fn auth_only(
        &self,
        req: ProxyRequest,
        mut response_headers: HeaderMap,
    ) -> Result<ProxyResponse, ProxyError> {
        match self.authenticated_session(&req, &mut response_headers).await {
            Ok(session) => {
                self.project_onto_response(&req, &mut response_headers, &session);
                Ok(ProxyResponse::new(202, response_headers, ""))
            }
            Err(ProxyError::NeedsLogin) => {
                Ok(ProxyResponse::new(401, response_headers, "unauthorized request"))
            }
            Err(e) => Err(e),
        }
    }

    /// `GET /userinfo` – the authenticated identity as JSON.
    async fn user_info(
        &self,
        req: ProxyRequest,
        mut response_headers: HeaderMap,
    ) -> Result<ProxyResponse, ProxyError> {
        #[derive(Serialize)]
        struct UserInfo<'a> {
            email: &'a str,
            #[serde(rename = "preferredUsername", skip_serializing_if = "str::is_empty")]
            preferred_username: &'a str,
        }

        match self.authenticated_session(&req, &mut response_headers).await {
            Ok(session) => {
                let body = serde_json::to_string(&UserInfo {
                    email: &session.email,
                    preferred_username: &session.preferred_username,
                })
                .map_err(|e| ProxyError::Other(e.to_string()))?;

                response_headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
                Ok(ProxyResponse::new(200, response_headers, body))
            }
            Err(ProxyError::NeedsLogin) => {
                Ok(ProxyResponse::new(401, response_headers, "Unauthorized"))
            }
            Err(e) => Err(e),
        }
    }

    /* ---------- the upstream paths ---------- */

    /// Whitelisted request: no authentication, optional header strip.
    async fn skip_auth_proxy(&self, mut req: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        if self.opts.skip_auth_strip_headers {
            strip_request_headers(&self.opts.headers, &mut req.headers);
        }
        self.upstream.forward(req).await
    }

    /// The authenticated proxy path: resolve a session, project
    /// identity onto request and response, forward.
    async fn proxy(
        &self,
        mut req: ProxyRequest,
        mut response_headers: HeaderMap,
    ) -> Result<ProxyResponse, ProxyError> {
        match self.authenticated_session(&req, &mut response_headers).await {
            Ok(session) => {
                apply_request_headers(&self.opts.headers, &mut req.headers, &session);
                self.project_onto_response(&req, &mut response_headers, &session);

                let mut response = self.upstream.forward(req).await?;
                for (name, value) in response_headers.iter() {
                    response.headers.append(name, value.clone());
                }
                Ok(response)
            }
            Err(ProxyError::NeedsLogin) => {
                if accepts_json(&req) {
                    response_headers
                        .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
                    return Ok(ProxyResponse::new(
                        401,
                        response_headers,
                        r#"{"error":"unauthorized"}"#,
                    ));
                }
                if self.opts.skip_provider_button {
                    let form = self.parse_form(&mut req).await.unwrap_or_default();
                    let redirect = self.resolve_redirect(&req, &form);
                    self.start_flow(&req, response_headers, &redirect)
                } else {
                    let form = self.parse_form(&mut req).await.unwrap_or_default();
                    let redirect = self.resolve_redirect(&req, &form);
                    self.sign_in_page(&req, response_headers, 403, &redirect)
                        .await
                }
            }
            Err(e) => {
                error_fmt!("Proxy", "unexpected error resolving session: {}", e);
                Ok(self.error_page_response(
                    response_headers,
                    500,
                    "Internal Error",
                    "Internal Error",
                ))
            }
        }
    }

    /// Resolve a live session or `NeedsLogin`.  A session whose email
    /// is no longer accepted by the policy predicate is cleared on the
    /// spot.
    async fn authenticated_session(
        &self,
        req: &ProxyRequest,
        response_headers: &mut HeaderMap,
    ) -> Result<SessionState, ProxyError> {
        let Some(session) = self.session_chain.resolve(req, response_headers).await? else {
            return Err(ProxyError::NeedsLogin);
        };

        if !session.email.is_empty() && !self.opts.email_is_allowed(&session.email) {
            audit::auth_failure(
                &session.email,
                req.remote_addr().await.as_deref(),
                "email no longer authorized, clearing session",
            );
            self.session_store.clear(req, response_headers).await?;
            return Err(ProxyError::NeedsLogin);
        }

        Ok(session)
    }

    /* ---------- helpers ---------- */

    /// Identity onto the response: policy headers, `GAP-Auth`, and the
    /// `X-Authorization` cookie WebSocket upgrades rely on.
    fn project_onto_response(
        &self,
        req: &ProxyRequest,
        response_headers: &mut HeaderMap,
        session: &SessionState,
    ) {
        apply_response_headers(&self.opts.headers, response_headers, session);

        let ws_cookie = make_cookie(
            &self.opts.cookie,
            &req.host,
            "X-Authorization",
            &session.id_token,
            self.opts.cookie.expire(),
        );
        set_cookie_header(response_headers, &ws_cookie);
    }

    /// The redirect URI registered with the provider: configured URL
    /// verbatim when it names a host, otherwise derived from the
    /// request host, with the scheme following the cookie's Secure bit.
    fn redirect_uri(&self, host: &str) -> String {
        if let Some(url) = &self.redirect_url {
            if url.host_str().is_some() {
                return url.to_string();
            }
        }
        let scheme = if self.opts.cookie.secure { "https" } else { "http" };
        format!("{scheme}://{host}{}/callback", self.opts.proxy_prefix)
    }

    /// Post-auth destination: `X-Auth-Request-Redirect` header, then
    /// the `rd` form value, then – when neither survives validation –
    /// the request URI itself (collapsed to `/` inside the prefix).
    fn resolve_redirect(&self, req: &ProxyRequest, form: &HashMap<String, String>) -> String {
        let mut redirect = req
            .header("x-auth-request-redirect")
            .unwrap_or_default()
            .to_string();
        if let Some(rd) = form.get("rd") {
            if !rd.is_empty() {
                redirect = rd.clone();
            }
        }

        if !is_valid_redirect(&redirect, &self.opts.whitelist_domains) {
            redirect = req.request_uri();
            if redirect.starts_with(&self.opts.proxy_prefix) {
                redirect = "/".to_string();
            }
        }
        redirect
    }

    /// Merge query parameters and, for form POSTs, the body.  Body
    /// values win, as they do for `FormValue` semantics everywhere.
    async fn parse_form(
        &self,
        req: &mut ProxyRequest,
    ) -> Result<HashMap<String, String>, ProxyError> {
        let mut form = HashMap::new();

        if let Some(query) = &req.query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                form.insert(key.into_owned(), value.into_owned());
            }
        }

        let is_form_post = matches!(
            req.method,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch
        ) && req
            .header("content-type")
            .map(|ct| ct.starts_with(FORM_URLENCODED))
            .unwrap_or(false);

        if is_form_post {
            let bytes = read_body(req.take_body(), FORM_BODY_LIMIT).await?;
            for (key, value) in url::form_urlencoded::parse(&bytes) {
                form.insert(key.into_owned(), value.into_owned());
            }
        }

        Ok(form)
    }

    /// Render the sign-in page.  Any existing session cookie is
    /// cleared: this page means "you are not signed in".
    async fn sign_in_page(
        &self,
        req: &ProxyRequest,
        mut response_headers: HeaderMap,
        status: u16,
        redirect: &str,
    ) -> Result<ProxyResponse, ProxyError> {
        prepare_no_cache(&mut response_headers);
        self.session_store
            .clear(req, &mut response_headers)
            .await?;
        Ok(html_response(
            status,
            response_headers,
            self.pages.sign_in_page(redirect),
        ))
    }

    fn permission_denied(&self, response_headers: HeaderMap, message: &str) -> ProxyResponse {
        self.error_page_response(response_headers, 403, "Permission Denied", message)
    }

    fn internal_error(&self, response_headers: HeaderMap, err: &ProxyError) -> ProxyResponse {
        error_fmt!("AuthProxy", "internal error: {}", err);
        self.error_page_response(response_headers, 500, "Internal Error", "Internal Error")
    }

    fn error_page_response(
        &self,
        response_headers: HeaderMap,
        code: u16,
        title: &str,
        message: &str,
    ) -> ProxyResponse {
        html_response(code, response_headers, self.pages.error_page(code, title, message))
    }
}

/* ---------- free helpers ---------- */

/// The no-cache triplet for the proxy's own endpoints.
pub fn prepare_no_cache(headers: &mut HeaderMap) {
    headers.insert("expires", HeaderValue::from_static(EPOCH_RFC1123));
    headers.insert(
        "cache-control",
        HeaderValue::from_static("no-cache, no-store, must-revalidate, max-age=0"),
    );
    headers.insert("x-accel-expires", HeaderValue::from_static("0"));
}

fn robots_txt(mut headers: HeaderMap) -> ProxyResponse {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    ProxyResponse::new(200, headers, ROBOTS_TXT)
}

fn redirect_response(mut headers: HeaderMap, location: &str) -> ProxyResponse {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            headers.insert(LOCATION, value);
            ProxyResponse::new(302, headers, "")
        }
        // A location we cannot even encode as a header is not followed.
        Err(_) => ProxyResponse::new(500, headers, "Internal Error"),
    }
}

fn html_response(status: u16, mut headers: HeaderMap, body: String) -> ProxyResponse {
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    ProxyResponse::new(status, headers, body)
}

/// 32 hex chars of CSRF nonce.
fn generate_nonce() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

/// Does the client prefer a JSON error over a sign-in page?
fn accepts_json(req: &ProxyRequest) -> bool {
    req.header("accept")
        .map(|accept| {
            accept
                .split(',')
                .any(|part| part.trim().split(';').next() == Some(APPLICATION_JSON))
        })
        .unwrap_or(false)
}

/// Buffer a small request body (forms only), bounded by `limit`.
async fn read_body(body: reqwest::Body, limit: usize) -> Result<Vec<u8>, ProxyError> {
    use futures_util::StreamExt;

    let mut stream = body.into_data_stream();
    let mut buffer = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProxyError::Other(e.to_string()))?;
        if buffer.len() + chunk.len() > limit {
            return Err(ProxyError::Other("form body too large".to_string()));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}
