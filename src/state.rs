// src/state.rs

use std::sync::Arc;

use crate::api::{ApiClient, LogoutHook};
use crate::db::{resolve_storage_path, LocalStorage};
use crate::error::{ApiError, AppError};
use crate::events::EventBus;
use crate::preferences::Preferences;
use crate::settings::ClientConfig;
use crate::stores::{AdminStore, AuthStore, ChatStore, ModelsStore, ToastStore, UserSettingsStore};

/// Every store of one client instance, wired to a shared pipeline, event
/// bus and local storage. Nothing here is global: tests build as many
/// contexts as they like.
pub struct AppContext {
    pub config: ClientConfig,
    pub events: EventBus,
    pub storage: LocalStorage,
    pub api: ApiClient,
    pub toasts: ToastStore,
    pub auth: AuthStore,
    pub chat: ChatStore,
    pub models: ModelsStore,
    pub admin: AdminStore,
    pub user_settings: UserSettingsStore,
    pub preferences: Preferences,
    /// Keeps the logout hook alive; the client only holds it weakly.
    _on_session_end: LogoutHook,
}

impl AppContext {
    pub fn new(config: ClientConfig, storage: LocalStorage) -> Result<Self, ApiError> {
        let events = EventBus::new();
        let api = ApiClient::new(&config, storage.clone(), events.clone())?;
        let toasts = ToastStore::new(config.toast_duration(), events.clone());
        let chat = ChatStore::new(api.clone(), toasts.clone(), events.clone());
        let admin = AdminStore::new(api.clone());
        let user_settings = UserSettingsStore::new(api.clone());

        // Every way a session can end (explicit logout, failed refresh,
        // rejected profile) also drops the previous user's data.
        let on_session_end: LogoutHook = {
            let (chat, admin, user_settings) = (chat.clone(), admin.clone(), user_settings.clone());
            Arc::new(move || {
                tracing::debug!("Session ended; clearing user state");
                clear_user_state(&chat, &admin, &user_settings);
            })
        };
        api.on_logout(&on_session_end);

        Ok(Self {
            auth: AuthStore::new(api.clone(), config.profile_timeout()),
            models: ModelsStore::new(api.clone(), toasts.clone(), events.clone(), config.models_cache()),
            preferences: Preferences::new(storage.clone()),
            chat,
            admin,
            user_settings,
            config,
            events,
            storage,
            api,
            toasts,
            _on_session_end: on_session_end,
        })
    }

    /// Opens local storage at the configured path (or the default data
    /// directory) and builds the context on top of it.
    pub fn open(config: ClientConfig) -> Result<Self, AppError> {
        let path = match &config.storage_path {
            Some(path) => path.clone(),
            None => resolve_storage_path()?,
        };
        tracing::info!(path = %path.display(), api = %config.api_base_url, "Opening client context");
        let storage = LocalStorage::open(&path)?;
        Ok(Self::new(config, storage)?)
    }

    /// Drops per-user state held outside the session.
    pub fn clear_user_state(&self) {
        clear_user_state(&self.chat, &self.admin, &self.user_settings);
    }

    pub async fn logout(&self) -> bool {
        let ended = self.auth.logout().await;
        self.clear_user_state();
        ended
    }
}

fn clear_user_state(chat: &ChatStore, admin: &AdminStore, user_settings: &UserSettingsStore) {
    chat.reset();
    admin.reset();
    user_settings.reset();
}
