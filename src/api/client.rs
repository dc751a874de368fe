// src/api/client.rs

use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderValue, ACCEPT, COOKIE};
use reqwest::{Method, Response, StatusCode, Url};
use reqwest_eventsource::EventSource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::api::refresh::RefreshGate;
use crate::api::session::SessionState;
use crate::db::LocalStorage;
use crate::error::{ApiError, FieldError};
use crate::events::EventBus;
use crate::settings::{AuthMode, ClientConfig};
use crate::types::{RefreshRequest, TokenPair};

pub const REFRESH_PATH: &str = "auth/refresh";
pub const LOGOUT_PATH: &str = "auth/logout";

#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Form(Value),
}

/// A request as plain data, so the pipeline can send it again after a
/// token refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Body,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: Body::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        self.body = Body::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    /// `application/x-www-form-urlencoded` body; `body` must serialize to a
    /// flat object.
    pub fn form<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        self.body = Body::Form(serde_json::to_value(body)?);
        Ok(self)
    }

    fn is_refresh(&self) -> bool {
        self.path.trim_start_matches('/') == REFRESH_PATH
    }
}

/// Cookie jar that can be emptied on logout; `reqwest::cookie::Jar` itself
/// has no way to forget cookies.
#[derive(Default)]
pub struct SessionCookies {
    jar: RwLock<Arc<Jar>>,
}

impl SessionCookies {
    fn take(&self) -> Arc<Jar> {
        std::mem::take(&mut *self.jar.write())
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.jar.read().set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.read().cookies(url)
    }
}

/// Callback run after a session ends.
pub type LogoutHook = Arc<dyn Fn() + Send + Sync>;

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    session: SessionState,
    refresh: RefreshGate,
    cookies: Option<Arc<SessionCookies>>,
    logout_hooks: Mutex<Vec<Weak<dyn Fn() + Send + Sync>>>,
}

/// The request pipeline. Cheap to clone; clones share the session and the
/// refresh gate.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, storage: LocalStorage, events: EventBus) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        let cookies = match config.auth_mode {
            AuthMode::Cookie => {
                let jar = Arc::new(SessionCookies::default());
                builder = builder.cookie_provider(jar.clone());
                Some(jar)
            }
            AuthMode::Bearer => None,
        };

        Ok(Self {
            inner: Arc::new(ClientInner {
                http: builder.build()?,
                base_url: config.api_base_url.trim_end_matches('/').to_string(),
                session: SessionState::restore(config.auth_mode, storage, events),
                refresh: RefreshGate::new(),
                cookies,
                logout_hooks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn session(&self) -> &SessionState {
        &self.inner.session
    }

    pub fn url(&self, path: &str) -> String {
        build_url(&self.inner.base_url, path)
    }

    /// Sends `request` with the current credentials and decodes the body.
    ///
    /// A 401 triggers (or joins) a single token refresh and one replay when
    /// `refresh_on_auth_error` is set. The replay never refreshes again.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        refresh_on_auth_error: bool,
    ) -> Result<T, ApiError> {
        let value = self.execute_value(request, refresh_on_auth_error).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Like `execute`, for endpoints whose body carries nothing we need.
    pub async fn execute_empty(&self, request: &ApiRequest, refresh_on_auth_error: bool) -> Result<(), ApiError> {
        self.execute_value(request, refresh_on_auth_error).await.map(|_| ())
    }

    async fn execute_value(&self, request: &ApiRequest, refresh_on_auth_error: bool) -> Result<Value, ApiError> {
        let (bearer, epoch) = self.inner.session.credentials();
        let response = self.send(request, bearer.as_deref(), None).await?;

        if response.status() != StatusCode::UNAUTHORIZED || !refresh_on_auth_error {
            return self.finish(request, response).await;
        }

        if request.is_refresh() {
            tracing::warn!("Refresh endpoint rejected credentials; logging out");
            self.logout().await;
            return Err(ApiError::SessionExpired);
        }

        if !self.inner.session.is_authenticated() {
            return Err(ApiError::SessionExpired);
        }

        // Credentials rotated while this request was in flight: replay with
        // the new ones instead of refreshing a second time.
        if self.inner.session.epoch() == epoch && !self.refresh_access_token().await {
            return Err(ApiError::SessionExpired);
        }

        let (bearer, _) = self.inner.session.credentials();
        let retried = self.send(request, bearer.as_deref(), None).await?;
        self.finish(request, retried).await
    }

    async fn finish(&self, request: &ApiRequest, response: Response) -> Result<Value, ApiError> {
        let result = read_response(response).await;
        if let Err(e) = &result {
            tracing::warn!(
                method = %request.method,
                path = %request.path,
                status = ?e.status(),
                error = %e,
                "API request failed"
            );
        }
        result
    }

    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
        cookie: Option<HeaderValue>,
    ) -> Result<Response, ApiError> {
        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), self.url(&request.path));

        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(body) => builder.json(body),
            Body::Form(body) => builder.form(body),
        };

        Ok(builder.send().await?)
    }

    /// Single-flight: concurrent callers share one `auth/refresh` call.
    /// Returns `false` (and the session is cleared) when the refresh fails.
    pub async fn refresh_access_token(&self) -> bool {
        let this = self.clone();
        self.inner
            .refresh
            .run(move || async move { this.perform_refresh().await }.boxed())
            .await
    }

    async fn perform_refresh(&self) -> bool {
        let Some(refresh_token) = self.inner.session.refresh_token() else {
            tracing::warn!("No refresh token available");
            self.logout().await;
            return false;
        };

        tracing::debug!("Refreshing access token");
        let (bearer, epoch) = self.inner.session.credentials();
        let outcome = async {
            let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest {
                refresh_token: &refresh_token,
            })?;
            let response = self.send(&request, bearer.as_deref(), None).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(ApiError::SessionExpired);
            }
            let value = read_response(response).await?;
            Ok::<TokenPair, ApiError>(serde_json::from_value(value)?)
        }
        .await;

        // The session may have ended (or been replaced) while the refresh
        // was in flight; its outcome then belongs to nobody.
        match outcome {
            Ok(pair) => {
                if self
                    .inner
                    .session
                    .set_tokens_if_current(epoch, pair.access_token, pair.refresh_token)
                {
                    tracing::info!("Access token refreshed");
                    true
                } else {
                    tracing::debug!("Discarding refresh for an ended session");
                    false
                }
            }
            Err(e) if self.inner.session.epoch() != epoch => {
                tracing::debug!(error = %e, "Ignoring failed refresh for an ended session");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed");
                self.logout().await;
                false
            }
        }
    }

    /// Clears the session before touching the network, then tells the
    /// server with the old credentials. Returns whether a session existed;
    /// a second call is a no-op.
    pub async fn logout(&self) -> bool {
        let Some(previous) = self.inner.session.clear() else {
            return false;
        };
        self.inner.refresh.reset();
        self.run_logout_hooks();

        let url = self.url(LOGOUT_PATH);
        let cookie = self.inner.cookies.as_ref().and_then(|cookies| {
            let old = cookies.take();
            Url::parse(&url).ok().and_then(|url| old.cookies(&url))
        });
        let bearer = match self.inner.session.mode() {
            AuthMode::Bearer => previous.access_token,
            AuthMode::Cookie => None,
        };

        match self
            .send(&ApiRequest::delete(LOGOUT_PATH), bearer.as_deref(), cookie)
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Server session ended");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Logout request rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Logout request failed");
            }
        }
        true
    }

    /// Registers `hook` to run whenever a session ends, whoever ended it.
    /// Only a weak reference is kept; dropping the `Arc` unregisters it.
    pub fn on_logout(&self, hook: &LogoutHook) {
        let mut hooks = self.inner.logout_hooks.lock();
        hooks.retain(|h| h.strong_count() > 0);
        hooks.push(Arc::downgrade(hook));
    }

    fn run_logout_hooks(&self) {
        let hooks: Vec<LogoutHook> = self
            .inner
            .logout_hooks
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for hook in hooks {
            hook();
        }
    }

    /// Opens the server-push channel for `path_and_query` with the current
    /// credentials attached.
    pub fn event_source(&self, path_and_query: &str) -> Result<EventSource, ApiError> {
        let mut builder = self
            .inner
            .http
            .get(self.url(path_and_query))
            .header(ACCEPT, "text/event-stream");
        if let (Some(token), _) = self.inner.session.credentials() {
            builder = builder.bearer_auth(token);
        }
        EventSource::new(builder).map_err(|e| ApiError::Stream(e.to_string()))
    }
}

pub fn build_url(base_url: &str, path: &str) -> String {
    let clean = path.strip_prefix('/').unwrap_or(path);
    format!("{}/api/v1/{}", base_url.trim_end_matches('/'), clean)
}

/// Decodes a body (empty or non-JSON reads as `{}`) and turns non-2xx
/// statuses into `ApiError::Http`.
async fn read_response(response: Response) -> Result<Value, ApiError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    let body = if bytes.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::Object(Default::default()))
    };

    if status.is_success() {
        Ok(body)
    } else {
        Err(normalize_error(status, &body))
    }
}

pub fn normalize_error(status: StatusCode, body: &Value) -> ApiError {
    let mut message = format!("Request failed with status {}", status.as_u16());
    let mut errors = Vec::new();

    match body.get("detail") {
        Some(Value::Array(details)) => {
            for detail in details {
                let field = detail
                    .get("loc")
                    .and_then(Value::as_array)
                    .and_then(|loc| loc.get(1))
                    .map(|f| match f {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "unknown field".to_string());
                errors.push(FieldError {
                    field,
                    message: detail
                        .get("msg")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    kind: detail
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("validation_error")
                        .to_string(),
                });
            }
            let summary: Vec<String> = errors
                .iter()
                .map(|e| format!("{} - {}", e.field, e.message))
                .collect();
            message = format!("Validation error: {}", summary.join("; "));
        }
        Some(Value::String(detail)) if !detail.is_empty() => message = detail.clone(),
        Some(Value::Null) | None => {}
        Some(other) => message = other.to_string(),
    }

    ApiError::Http {
        status,
        message,
        errors,
    }
}
