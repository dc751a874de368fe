// src/types/model.rs

use serde::{Deserialize, Serialize};

use super::serde_util::null_as_empty;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelDetails {
    #[serde(default)]
    pub parent_model: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub families: Vec<String>,
    #[serde(default)]
    pub parameter_size: Option<String>,
    #[serde(default)]
    pub quantization_level: Option<String>,
}

/// A model as listed by the backend's Ollama proxy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub details: ModelDetails,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub capabilities: Vec<String>,
}

impl OllamaModel {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(capability))
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct TagsResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub models: Vec<OllamaModel>,
}

/// Body for model pull/delete.
#[derive(Serialize, Debug)]
pub struct ModelName<'a> {
    pub model: &'a str,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct OllamaVersion {
    pub version: String,
}
