// src/stores/admin.rs

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::api::{ApiClient, ApiRequest};
use crate::error::{AdminError, ApiError};
use crate::types::{ModelName, OllamaModel, OllamaVersion, Registration, TagsResponse, User, UserSettings, UserUpdate};

#[derive(Default)]
struct AdminState {
    users: Vec<User>,
    models: Vec<OllamaModel>,
    loading: bool,
    users_error: Option<String>,
    ollama_error: Option<String>,
}

struct AdminInner {
    api: ApiClient,
    state: Mutex<AdminState>,
}

/// User and model management. Every operation checks the session's role
/// first and refuses non-admins without touching the network.
#[derive(Clone)]
pub struct AdminStore {
    inner: Arc<AdminInner>,
}

/// Which error slot a failed operation reports into.
#[derive(Clone, Copy)]
enum Area {
    Users,
    Ollama,
    Quiet,
}

impl AdminStore {
    pub fn new(api: ApiClient) -> Self {
        Self {
            inner: Arc::new(AdminInner {
                api,
                state: Mutex::new(AdminState::default()),
            }),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.inner
            .api
            .session()
            .user()
            .is_some_and(|u| u.is_admin())
    }

    fn require_admin(&self) -> Result<(), AdminError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AdminError::Forbidden)
        }
    }

    pub fn users(&self) -> Vec<User> {
        self.inner.state.lock().users.clone()
    }

    pub fn models(&self) -> Vec<OllamaModel> {
        self.inner.state.lock().models.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().loading
    }

    pub fn users_error(&self) -> Option<String> {
        self.inner.state.lock().users_error.clone()
    }

    pub fn ollama_error(&self) -> Option<String> {
        self.inner.state.lock().ollama_error.clone()
    }

    async fn call<T, F>(&self, area: Area, what: &str, request: ApiRequest, apply: F) -> Result<T, AdminError>
    where
        T: serde::de::DeserializeOwned,
        F: FnOnce(&mut AdminState, &T),
    {
        self.require_admin()?;

        let tracked = !matches!(area, Area::Quiet);
        if tracked {
            let mut state = self.inner.state.lock();
            state.loading = true;
            match area {
                Area::Users => state.users_error = None,
                Area::Ollama => state.ollama_error = None,
                Area::Quiet => {}
            }
        }

        let result: Result<T, ApiError> = self.inner.api.execute(&request, true).await;

        let mut state = self.inner.state.lock();
        if tracked {
            state.loading = false;
        }
        match result {
            Ok(value) => {
                apply(&mut *state, &value);
                Ok(value)
            }
            Err(e) => {
                tracing::error!(error = %e, "Error {what}");
                match area {
                    Area::Users => state.users_error = Some(e.user_message()),
                    Area::Ollama => state.ollama_error = Some(e.user_message()),
                    Area::Quiet => {}
                }
                Err(e.into())
            }
        }
    }

    fn replace_user(state: &mut AdminState, user_id: &str, updated: &User) {
        if let Some(slot) = state.users.iter_mut().find(|u| u.id == user_id) {
            *slot = updated.clone();
        }
    }

    pub async fn fetch_users(&self) -> Result<Vec<User>, AdminError> {
        self.call(Area::Users, "fetching users", ApiRequest::get("users"), |state, users: &Vec<User>| {
            state.users = users.clone();
        })
        .await
    }

    pub async fn create_user(&self, registration: &Registration) -> Result<User, AdminError> {
        let request = ApiRequest::post("auth/register").json(registration)?;
        self.call(Area::Users, "creating user", request, |state, user: &User| {
            state.users.insert(0, user.clone());
        })
        .await
    }

    pub async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<User, AdminError> {
        let request = ApiRequest::put(format!("users/{user_id}")).json(update)?;
        self.call(Area::Users, "updating user", request, |state, user: &User| {
            Self::replace_user(state, user_id, user);
        })
        .await
    }

    /// The backend deactivates rather than deletes.
    pub async fn deactivate_user(&self, user_id: &str) -> Result<User, AdminError> {
        let request = ApiRequest::delete(format!("users/{user_id}"));
        self.call(Area::Users, "deactivating user", request, |state, user: &User| {
            Self::replace_user(state, user_id, user);
        })
        .await
    }

    pub async fn activate_user(&self, user_id: &str) -> Result<User, AdminError> {
        let request = ApiRequest::post(format!("users/{user_id}/activate"));
        self.call(Area::Users, "activating user", request, |state, user: &User| {
            Self::replace_user(state, user_id, user);
        })
        .await
    }

    pub async fn fetch_ollama_models(&self) -> Result<Vec<OllamaModel>, AdminError> {
        let tags: TagsResponse = self
            .call(Area::Ollama, "fetching Ollama models", ApiRequest::get("ollama/tags"), |state, tags: &TagsResponse| {
                state.models = tags.models.clone();
            })
            .await?;
        Ok(tags.models)
    }

    /// Pulls a model, then reloads the model list.
    pub async fn pull_ollama_model(&self, model: &str) -> Result<Value, AdminError> {
        let request = ApiRequest::post("ollama/pull").json(&ModelName { model })?;
        let response = self
            .call(Area::Ollama, "pulling Ollama model", request, |_, _: &Value| {})
            .await?;
        self.fetch_ollama_models().await?;
        Ok(response)
    }

    pub async fn delete_ollama_model(&self, model: &str) -> Result<Value, AdminError> {
        let request = ApiRequest::delete("ollama/delete").json(&ModelName { model })?;
        let response = self
            .call(Area::Ollama, "deleting Ollama model", request, |_, _: &Value| {})
            .await?;
        self.fetch_ollama_models().await?;
        Ok(response)
    }

    pub async fn get_ollama_version(&self) -> Result<OllamaVersion, AdminError> {
        self.call(Area::Quiet, "fetching Ollama version", ApiRequest::get("ollama/version"), |_, _: &OllamaVersion| {})
            .await
    }

    pub async fn get_user_settings(&self, user_id: &str) -> Result<UserSettings, AdminError> {
        let request = ApiRequest::get(format!("user-settings/{user_id}"));
        self.call(Area::Quiet, "fetching user settings", request, |_, _: &UserSettings| {})
            .await
    }

    pub async fn update_user_settings(&self, user_id: &str, settings: &UserSettings) -> Result<UserSettings, AdminError> {
        let request = ApiRequest::put(format!("user-settings/{user_id}")).json(settings)?;
        self.call(Area::Quiet, "updating user settings", request, |_, _: &UserSettings| {})
            .await
    }

    pub async fn delete_user_settings(&self, user_id: &str) -> Result<(), AdminError> {
        let request = ApiRequest::delete(format!("user-settings/{user_id}"));
        self.call(Area::Quiet, "deleting user settings", request, |_, _: &Value| {})
            .await
            .map(|_| ())
    }

    pub fn reset(&self) {
        *self.inner.state.lock() = AdminState::default();
    }
}
