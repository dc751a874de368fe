// src/stores/user_settings.rs

use std::sync::Arc;

use parking_lot::Mutex;

use crate::api::{ApiClient, ApiRequest};
use crate::error::ApiError;
use crate::types::UserSettings;

const SETTINGS_PATH: &str = "user-settings/me";

#[derive(Default)]
struct SettingsState {
    settings: Option<UserSettings>,
    loading: bool,
    error: Option<String>,
}

/// The signed-in user's own settings.
#[derive(Clone)]
pub struct UserSettingsStore {
    api: ApiClient,
    state: Arc<Mutex<SettingsState>>,
}

impl UserSettingsStore {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(SettingsState::default())),
        }
    }

    pub fn settings(&self) -> Option<UserSettings> {
        self.state.lock().settings.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    fn begin(&self) {
        let mut state = self.state.lock();
        state.loading = true;
        state.error = None;
    }

    fn finish(&self, result: &Result<UserSettings, ApiError>) {
        let mut state = self.state.lock();
        state.loading = false;
        match result {
            Ok(settings) => state.settings = Some(settings.clone()),
            Err(e) => state.error = Some(e.user_message()),
        }
    }

    /// `None` when logged out or when the fetch fails.
    pub async fn fetch_settings(&self) -> Option<UserSettings> {
        if !self.api.session().is_authenticated() {
            return None;
        }
        self.begin();
        let result: Result<UserSettings, ApiError> =
            self.api.execute(&ApiRequest::get(SETTINGS_PATH), true).await;
        self.finish(&result);
        match result {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::error!(error = %e, "Settings fetch error");
                None
            }
        }
    }

    pub async fn update_settings(&self, settings: &UserSettings) -> Result<Option<UserSettings>, ApiError> {
        if !self.api.session().is_authenticated() {
            return Ok(None);
        }
        self.begin();
        let request = ApiRequest::put(SETTINGS_PATH).json(settings)?;
        let result: Result<UserSettings, ApiError> = self.api.execute(&request, true).await;
        self.finish(&result);
        result.map(Some)
    }

    pub fn reset(&self) {
        *self.state.lock() = SettingsState::default();
    }
}
