// src/stores/models.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::api::{ApiClient, ApiRequest};
use crate::events::{EventBus, StoreEvent};
use crate::stores::toast::ToastStore;
use crate::types::{OllamaModel, TagsResponse};

const VISION_CAPABILITY: &str = "vision";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelStatus {
    Loading,
    Offline,
    NoModels,
    Online,
}

#[derive(Default)]
struct ModelsState {
    models: Vec<OllamaModel>,
    loading: bool,
    error: Option<String>,
    last_fetch: Option<Instant>,
}

struct ModelsInner {
    api: ApiClient,
    toasts: ToastStore,
    events: EventBus,
    cache_for: Duration,
    state: Mutex<ModelsState>,
    /// Serializes fetches; a caller that waited here re-reads the cache.
    fetch_lock: tokio::sync::Mutex<()>,
}

/// Cached list of models the backend can serve.
#[derive(Clone)]
pub struct ModelsStore {
    inner: Arc<ModelsInner>,
}

impl ModelsStore {
    pub fn new(api: ApiClient, toasts: ToastStore, events: EventBus, cache_for: Duration) -> Self {
        Self {
            inner: Arc::new(ModelsInner {
                api,
                toasts,
                events,
                cache_for,
                state: Mutex::new(ModelsState::default()),
                fetch_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn cached(&self) -> Option<Vec<OllamaModel>> {
        let state = self.inner.state.lock();
        match state.last_fetch {
            Some(at) if !state.models.is_empty() && at.elapsed() < self.inner.cache_for => {
                Some(state.models.clone())
            }
            _ => None,
        }
    }

    /// Returns the model list, from cache unless it is stale or `force`.
    /// Failures clear the list; the toast is skipped for forced refreshes.
    pub async fn fetch_models(&self, force: bool) -> Vec<OllamaModel> {
        if !force {
            if let Some(models) = self.cached() {
                return models;
            }
        }

        let _guard = self.inner.fetch_lock.lock().await;
        if !force {
            if let Some(models) = self.cached() {
                return models;
            }
        }

        {
            let mut state = self.inner.state.lock();
            state.loading = true;
            state.error = None;
        }

        let result = self
            .inner
            .api
            .execute::<TagsResponse>(&ApiRequest::get("ollama/tags"), true)
            .await;

        let models = {
            let mut state = self.inner.state.lock();
            state.loading = false;
            match result {
                Ok(tags) => {
                    state.models = tags.models;
                    state.last_fetch = Some(Instant::now());
                    tracing::debug!(count = state.models.len(), "Loaded models");
                    state.models.clone()
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error fetching models");
                    state.error = Some(e.user_message());
                    state.models.clear();
                    if !force {
                        self.inner.toasts.error("Failed to load available models");
                    }
                    Vec::new()
                }
            }
        };

        self.inner.events.emit(StoreEvent::ModelsChanged);
        models
    }

    pub async fn refresh_models(&self) -> Vec<OllamaModel> {
        self.fetch_models(true).await
    }

    pub fn models(&self) -> Vec<OllamaModel> {
        self.inner.state.lock().models.clone()
    }

    pub fn get_model_by_name(&self, name: &str) -> Option<OllamaModel> {
        self.inner
            .state
            .lock()
            .models
            .iter()
            .find(|m| m.name == name)
            .cloned()
    }

    pub fn has_vision_capability(&self, name: &str) -> bool {
        self.get_model_by_name(name)
            .is_some_and(|m| m.has_capability(VISION_CAPABILITY))
    }

    pub fn is_available(&self) -> bool {
        let state = self.inner.state.lock();
        state.error.is_none() && !state.models.is_empty()
    }

    pub fn status(&self) -> ModelStatus {
        let state = self.inner.state.lock();
        if state.loading {
            ModelStatus::Loading
        } else if state.error.is_some() {
            ModelStatus::Offline
        } else if state.models.is_empty() {
            ModelStatus::NoModels
        } else {
            ModelStatus::Online
        }
    }

    pub fn status_message(&self) -> String {
        match self.status() {
            ModelStatus::Loading => "Connecting to Ollama...".to_string(),
            ModelStatus::Offline => "Ollama is not available".to_string(),
            ModelStatus::NoModels => "No models found in Ollama".to_string(),
            ModelStatus::Online => {
                let count = self.inner.state.lock().models.len();
                format!("{count} model{} available", if count == 1 { "" } else { "s" })
            }
        }
    }
}
