// src/types/chat.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::serde_util::{lenient_time, null_as_empty};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Where a locally created message is in its round trip to the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Delivery {
    Optimistic,
    Pending,
    #[default]
    Committed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: String,
    /// Client-side model choice; the backend does not store it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, alias = "archived")]
    pub is_archived: bool,
    #[serde(default = "Utc::now", with = "lenient_time")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", with = "lenient_time")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Stable client identity. Server ids arrive late (or never, for
    /// placeholders), so in-place edits are keyed on this.
    #[serde(skip, default = "Uuid::new_v4")]
    pub local_id: Uuid,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<String>,
    #[serde(
        rename = "created_at",
        alias = "timestamp",
        default = "Utc::now",
        with = "lenient_time"
    )]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_metadata: Option<Value>,
    #[serde(skip)]
    pub is_streaming: bool,
    #[serde(skip)]
    pub is_loading: bool,
    #[serde(skip)]
    pub is_error: bool,
    #[serde(skip)]
    pub edited: bool,
    #[serde(skip)]
    pub delivery: Delivery,
}

impl Message {
    fn local(chat_id: Option<String>, role: Role, content: String) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            id: None,
            chat_id,
            role,
            content,
            thinking: None,
            images: Vec::new(),
            timestamp: Utc::now(),
            model_id: None,
            tokens_used: None,
            extended_metadata: None,
            is_streaming: false,
            is_loading: false,
            is_error: false,
            edited: false,
            delivery: Delivery::Optimistic,
        }
    }

    pub fn optimistic_user(chat_id: &str, content: &str, images: Vec<String>) -> Self {
        let mut msg = Self::local(Some(chat_id.to_string()), Role::User, content.to_string());
        msg.images = images;
        msg
    }

    pub fn loading_placeholder(chat_id: &str) -> Self {
        let mut msg = Self::local(Some(chat_id.to_string()), Role::Assistant, String::new());
        msg.is_loading = true;
        msg
    }

    pub fn streaming_placeholder(chat_id: &str) -> Self {
        let mut msg = Self::local(Some(chat_id.to_string()), Role::Assistant, String::new());
        msg.is_streaming = true;
        msg
    }

    pub fn assistant(chat_id: &str, id: Option<String>, turn: ChatTurn) -> Self {
        let mut msg = Self::local(Some(chat_id.to_string()), Role::Assistant, turn.content);
        msg.id = id;
        msg.thinking = turn.thinking;
        msg.delivery = Delivery::Committed;
        msg
    }

    pub fn system_error(chat_id: Option<&str>, text: &str) -> Self {
        let mut msg = Self::local(chat_id.map(str::to_string), Role::System, text.to_string());
        msg.is_error = true;
        msg.delivery = Delivery::Committed;
        msg
    }

    /// Placeholders and injected errors are display-only and never go back
    /// to the model as history.
    pub fn is_transient(&self) -> bool {
        self.is_loading || self.is_streaming || self.is_error
    }
}

#[derive(Deserialize, Debug)]
pub struct ChatListResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub chats: Vec<Conversation>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Deserialize, Debug)]
pub struct ChatMessagesResponse {
    pub chat: Conversation,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Message>,
}

#[derive(Serialize, Debug)]
pub struct CreateChatRequest {
    pub title: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChatUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
}

/// The one message-edit contract: content plus optional images and
/// metadata. Absent fields are left untouched by the server.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct MessageUpdate {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_metadata: Option<Value>,
}

impl MessageUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

#[derive(Serialize, Debug)]
pub struct BulkDeleteRequest {
    pub message_ids: Vec<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct BulkDeleteResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub deleted_count: usize,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub failed_deletions: Vec<String>,
}

/// One turn of history as the backend's chat endpoint expects it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl From<&Message> for ChatTurn {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            thinking: None,
            images: if msg.images.is_empty() {
                None
            } else {
                Some(msg.images.clone())
            },
        }
    }
}

#[derive(Serialize, Debug)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    pub stream: bool,
    #[serde(rename = "chatId")]
    pub chat_id: String,
}

#[derive(Deserialize, Debug)]
pub struct OllamaChatResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub message: ChatTurn,
    #[serde(default)]
    pub eval_count: Option<u32>,
    /// Present when the server named the conversation from this exchange.
    #[serde(default, alias = "chat_title")]
    pub title: Option<String>,
}

/// One server-push event on the streaming channel.
#[derive(Deserialize, Debug, Default, PartialEq)]
pub struct StreamEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}
