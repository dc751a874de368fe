// src/settings.rs

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StorageError;

pub const API_BASE_ENV: &str = "OLLACHAT_API_BASE_URL";
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// How credentials travel with each request.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// `Authorization: Bearer <access token>` header.
    #[default]
    Bearer,
    /// Server-set cookies held in the client's cookie jar.
    Cookie,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub auth_mode: AuthMode,
    pub profile_timeout_secs: u64,
    pub toast_duration_ms: u64,
    pub models_cache_secs: u64,
    pub storage_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_mode: AuthMode::Bearer,
            profile_timeout_secs: 5,
            toast_duration_ms: 3000,
            models_cache_secs: 5 * 60,
            storage_path: None,
        }
    }
}

impl ClientConfig {
    pub fn profile_timeout(&self) -> Duration {
        Duration::from_secs(self.profile_timeout_secs)
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_duration_ms)
    }

    pub fn models_cache(&self) -> Duration {
        Duration::from_secs(self.models_cache_secs)
    }

    /// Environment wins over the file; an empty value is ignored.
    pub fn apply_env(&mut self) {
        if let Ok(base) = std::env::var(API_BASE_ENV) {
            if !base.trim().is_empty() {
                self.api_base_url = base.trim().to_string();
            }
        }
    }
}

/// Get the path to the config file (~/.config/ollachat/config.json)
pub fn get_config_path() -> Result<PathBuf, StorageError> {
    let config_dir = dirs::config_dir().ok_or(StorageError::NoDirectory("config"))?;

    let app_config_dir = config_dir.join("ollachat");

    if !app_config_dir.exists() {
        fs::create_dir_all(&app_config_dir)?;
    }

    Ok(app_config_dir.join("config.json"))
}

/// Load config from disk, creating the default file if it does not exist.
pub fn load_config(path: &Path) -> Result<ClientConfig, StorageError> {
    if !path.exists() {
        let default_config = ClientConfig::default();
        save_config(&default_config, path)?;
        tracing::info!(path = %path.display(), "Created default config");
        return Ok(default_config);
    }

    let content = fs::read_to_string(path)?;
    let config: ClientConfig = serde_json::from_str(&content)?;

    tracing::debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

pub fn save_config(config: &ClientConfig, path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}
