// src/stores/auth.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::api::{ApiClient, ApiRequest};
use crate::error::ApiError;
use crate::types::{LoginCredentials, Registration, TokenPair, User};

const LOGIN_PATH: &str = "auth/login";
const REGISTER_PATH: &str = "auth/register";
const PROFILE_PATH: &str = "users/me";

struct AuthInner {
    api: ApiClient,
    profile_timeout: Duration,
    initialized: AtomicBool,
    loading: AtomicBool,
    error: Mutex<Option<String>>,
}

/// Login, logout, refresh and profile operations over the shared session.
#[derive(Clone)]
pub struct AuthStore {
    inner: Arc<AuthInner>,
}

impl AuthStore {
    pub fn new(api: ApiClient, profile_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                api,
                profile_timeout,
                initialized: AtomicBool::new(false),
                loading: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.api.session().is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.api.session().user()
    }

    pub fn is_admin(&self) -> bool {
        self.user().is_some_and(|u| u.is_admin())
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.error.lock().clone()
    }

    fn record<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        *self.inner.error.lock() = result.as_ref().err().map(ApiError::user_message);
        result
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Option<User>, ApiError> {
        self.inner.loading.store(true, Ordering::SeqCst);
        let result = async {
            let request = ApiRequest::post(LOGIN_PATH).form(credentials)?;
            let tokens: TokenPair = self.inner.api.execute(&request, false).await?;
            self.inner
                .api
                .session()
                .set_tokens(tokens.access_token, tokens.refresh_token);
            tracing::info!(username = %credentials.username, "Logged in");
            Ok::<_, ApiError>(self.fetch_user_profile().await)
        }
        .await;
        self.inner.loading.store(false, Ordering::SeqCst);
        self.record(result)
    }

    /// Creates the account, then logs in with the same credentials.
    pub async fn register(&self, registration: &Registration) -> Result<Option<User>, ApiError> {
        let request = ApiRequest::post(REGISTER_PATH).json(registration)?;
        let created = self.inner.api.execute_empty(&request, false).await;
        self.record(created)?;
        tracing::info!(username = %registration.username, "Registered account");
        self.login(&registration.credentials()).await
    }

    /// Returns whether a session was ended. Calling it twice is harmless.
    pub async fn logout(&self) -> bool {
        let ended = self.inner.api.logout().await;
        if ended {
            tracing::info!("Logged out");
        }
        ended
    }

    pub async fn refresh_access_token(&self) -> bool {
        self.inner.api.refresh_access_token().await
    }

    /// Loads the profile for the current session. An auth failure gets one
    /// refresh and one retry; if that fails too the session is ended.
    pub async fn fetch_user_profile(&self) -> Option<User> {
        if !self.is_authenticated() {
            return None;
        }

        let request = ApiRequest::get(PROFILE_PATH);
        let first = self.inner.api.execute::<User>(&request, false).await;
        let user = match first {
            Ok(user) => user,
            Err(e) if e.is_auth_failure() => {
                tracing::debug!(error = %e, "Profile fetch rejected; refreshing");
                if !self.refresh_access_token().await {
                    return None;
                }
                match self.inner.api.execute::<User>(&request, false).await {
                    Ok(user) => user,
                    Err(e) => {
                        tracing::warn!(error = %e, "Profile fetch failed after refresh");
                        self.logout().await;
                        return None;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Profile fetch error");
                return None;
            }
        };

        self.inner.api.session().set_user(Some(user.clone()));
        Some(user)
    }

    /// Validates a restored session once per store. A profile fetch that
    /// fails or outlives the configured timeout ends the session.
    pub async fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.is_authenticated() {
            return;
        }

        match tokio::time::timeout(self.inner.profile_timeout, self.fetch_user_profile()).await {
            Ok(Some(user)) => {
                tracing::info!(username = %user.username, "Session restored");
            }
            Ok(None) => {
                tracing::warn!("Stored session is no longer valid");
                self.logout().await;
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.inner.profile_timeout, "Profile fetch timed out");
                self.logout().await;
            }
        }
    }
}
