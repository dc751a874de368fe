// src/stores/chat.rs

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::json;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::api::{ApiClient, ApiRequest};
use crate::error::{ApiError, ChatError};
use crate::events::{EventBus, StoreEvent};
use crate::stores::toast::ToastStore;
use crate::types::{
    BulkDeleteRequest, BulkDeleteResponse, ChatListResponse, ChatMessagesResponse, ChatTurn,
    ChatUpdate, Conversation, CreateChatRequest, Delivery, Message, MessageUpdate,
    OllamaChatRequest, OllamaChatResponse, Role,
};

pub(crate) const CHAT_PATH: &str = "ollama/chat";
const NEW_CHAT_TITLE: &str = "New Chat";

/// The one push channel a store may have open.
pub(crate) struct OpenChannel {
    pub id: u64,
    pub chat_id: String,
    pub close_tx: oneshot::Sender<()>,
}

#[derive(Default)]
pub(crate) struct ChatState {
    pub conversations: Vec<Conversation>,
    pub current: Option<Conversation>,
    pub messages: Vec<Message>,
    pub loading: bool,
    pub sending: bool,
    pub streaming: bool,
    pub error: Option<String>,
    /// Bumped on every navigation; loads that finish under an older value
    /// are discarded.
    pub selection_epoch: u64,
    pub channel: Option<OpenChannel>,
    pub next_channel_id: u64,
}

impl ChatState {
    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.id.as_str())
    }

    pub fn is_current(&self, chat_id: &str) -> bool {
        self.current_id() == Some(chat_id)
    }

    /// History sent to the model: committed turns only.
    pub fn history(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .filter(|m| !m.is_transient() && m.delivery != Delivery::Failed)
            .map(ChatTurn::from)
            .collect()
    }

    pub fn message_mut(&mut self, local_id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.local_id == local_id)
    }

    pub fn remove_local(&mut self, local_id: Uuid) {
        self.messages.retain(|m| m.local_id != local_id);
    }

    pub fn set_delivery(&mut self, local_id: Uuid, delivery: Delivery) {
        if let Some(msg) = self.message_mut(local_id) {
            msg.delivery = delivery;
        }
    }

    /// Applies `f` to the list entry and the current copy of `chat_id`.
    fn edit_conversation(&mut self, chat_id: &str, mut f: impl FnMut(&mut Conversation)) {
        for conv in self
            .conversations
            .iter_mut()
            .chain(self.current.iter_mut())
            .filter(|c| c.id == chat_id)
        {
            f(conv);
        }
    }

    fn rename(&mut self, chat_id: &str, title: &str) {
        self.edit_conversation(chat_id, |conv| conv.title = title.to_string());
    }
}

pub(crate) struct ChatInner {
    pub api: ApiClient,
    pub toasts: ToastStore,
    pub events: EventBus,
    pub state: Mutex<ChatState>,
}

/// Conversation list, current conversation and its messages.
///
/// State sits behind a mutex that is never held across an `.await`; every
/// handler re-checks the current conversation after each network call.
#[derive(Clone)]
pub struct ChatStore {
    pub(crate) inner: Arc<ChatInner>,
}

impl ChatStore {
    pub fn new(api: ApiClient, toasts: ToastStore, events: EventBus) -> Self {
        Self {
            inner: Arc::new(ChatInner {
                api,
                toasts,
                events,
                state: Mutex::new(ChatState::default()),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.inner.state.lock()
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        self.inner.events.emit(event);
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.lock().conversations.clone()
    }

    pub fn current_conversation(&self) -> Option<Conversation> {
        self.lock().current.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn is_sending(&self) -> bool {
        self.lock().sending
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    pub fn has_open_channel(&self) -> bool {
        self.lock().channel.is_some()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    fn notify_messages(&self, chat_id: Option<String>) {
        self.emit(StoreEvent::MessagesChanged { chat_id });
    }

    fn notify_current(&self) {
        let chat_id = self.lock().current_id().map(str::to_string);
        self.emit(StoreEvent::CurrentConversationChanged { chat_id });
    }

    fn fail(&self, error_text: &str, toast: &str) {
        self.lock().error = Some(error_text.to_string());
        self.inner.toasts.error(toast);
    }

    pub async fn fetch_chats(&self) -> Result<Vec<Conversation>, ApiError> {
        {
            let mut state = self.lock();
            state.loading = true;
            state.error = None;
        }

        let result = self
            .inner
            .api
            .execute::<ChatListResponse>(&ApiRequest::get("chats/my"), true)
            .await;

        let mut state = self.lock();
        state.loading = false;
        match result {
            Ok(list) => {
                // The backend does not store model choices; keep ours.
                let mut chats = list.chats;
                for chat in chats.iter_mut().filter(|c| c.model.is_none()) {
                    chat.model = state
                        .conversations
                        .iter()
                        .find(|c| c.id == chat.id)
                        .and_then(|c| c.model.clone());
                }
                tracing::debug!(count = chats.len(), total = list.total, "Loaded chats");
                state.conversations = chats.clone();
                drop(state);
                self.emit(StoreEvent::ConversationsChanged);
                Ok(chats)
            }
            Err(e) => {
                drop(state);
                tracing::error!(error = %e, "Error fetching chats");
                self.fail("Failed to load chats", "Failed to load chat history");
                Err(e)
            }
        }
    }

    /// Loads a conversation and its messages and makes it current.
    pub async fn load_chat(&self, chat_id: &str) -> Result<Conversation, ApiError> {
        let epoch = {
            let mut state = self.lock();
            state.selection_epoch += 1;
            state.selection_epoch
        };
        self.load_into_current(chat_id, epoch, None).await
    }

    async fn load_into_current(
        &self,
        chat_id: &str,
        epoch: u64,
        model: Option<String>,
    ) -> Result<Conversation, ApiError> {
        {
            let mut state = self.lock();
            state.loading = true;
            state.error = None;
        }

        let result = self
            .inner
            .api
            .execute::<ChatMessagesResponse>(&ApiRequest::get(format!("chats/chat/{chat_id}")), true)
            .await;

        let mut state = self.lock();
        if state.selection_epoch != epoch {
            tracing::debug!(chat_id, "Discarding stale conversation load");
            return result.map(|r| r.chat);
        }
        state.loading = false;

        match result {
            Ok(loaded) => {
                let mut chat = loaded.chat;
                if chat.model.is_none() {
                    chat.model = model.or_else(|| state.current.as_ref().and_then(|c| c.model.clone()));
                }
                state.current = Some(chat.clone());
                state.messages = loaded.messages;
                drop(state);
                self.notify_current();
                self.notify_messages(Some(chat.id.clone()));
                Ok(chat)
            }
            Err(e) => {
                drop(state);
                tracing::error!(chat_id, error = %e, "Error loading chat");
                self.fail("Failed to load chat", "Failed to load chat messages");
                Err(e)
            }
        }
    }

    /// Makes `conversation` current and replaces the message list with its
    /// server-side history. `None` clears the selection.
    pub async fn select_conversation(&self, conversation: Option<Conversation>) -> Result<(), ApiError> {
        self.close_event_source();

        let epoch = {
            let mut state = self.lock();
            state.selection_epoch += 1;
            state.current = conversation.clone();
            state.messages.clear();
            state.loading = false;
            state.selection_epoch
        };
        self.notify_current();
        self.notify_messages(conversation.as_ref().map(|c| c.id.clone()));

        match conversation {
            Some(conv) => self
                .load_into_current(&conv.id, epoch, conv.model.clone())
                .await
                .map(|_| ()),
            None => Ok(()),
        }
    }

    pub async fn start_new_conversation(&self) -> Result<Conversation, ApiError> {
        self.close_event_source();
        self.lock().loading = true;

        let request = ApiRequest::post("chats/my").json(&CreateChatRequest {
            title: NEW_CHAT_TITLE.to_string(),
        })?;
        let result = self.inner.api.execute::<Conversation>(&request, true).await;

        let mut state = self.lock();
        state.loading = false;
        match result {
            Ok(chat) => {
                state.selection_epoch += 1;
                state.current = Some(chat.clone());
                state.messages.clear();
                state.error = None;
                state.conversations.insert(0, chat.clone());
                drop(state);
                tracing::info!(chat_id = %chat.id, "Created conversation");
                self.emit(StoreEvent::ConversationsChanged);
                self.notify_current();
                self.notify_messages(Some(chat.id.clone()));
                Ok(chat)
            }
            Err(e) => {
                drop(state);
                tracing::error!(error = %e, "Error creating chat");
                self.fail("Failed to create new chat", "Failed to create new chat");
                Err(e)
            }
        }
    }

    /// Preconditions for sending and streaming, checked without side
    /// effects. Returns the trimmed model name.
    pub fn can_send(&self, text: &str, model: Option<&str>) -> Result<String, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        match model.map(str::trim).filter(|m| !m.is_empty()) {
            None => Err(ChatError::MissingModel),
            Some(_) if !self.inner.api.session().is_authenticated() => Err(ChatError::NotAuthenticated),
            Some(model) => Ok(model.to_string()),
        }
    }

    /// `can_send` plus the error toast. Nothing else is mutated when it fails.
    pub(crate) fn check_send(&self, text: &str, model: Option<&str>) -> Result<String, ChatError> {
        let result = self.can_send(text, model);
        if let Err(e) = &result {
            self.inner.toasts.error(e.to_string());
        }
        result
    }

    /// Current conversation id, creating a conversation if there is none.
    pub(crate) async fn ensure_conversation(&self) -> Result<String, ChatError> {
        let current = self.lock().current_id().map(str::to_string);
        match current {
            Some(id) => Ok(id),
            None => Ok(self.start_new_conversation().await?.id),
        }
    }

    /// Sends `text` and waits for the whole reply.
    ///
    /// The user message is shown immediately with a loading placeholder
    /// behind it. On failure the placeholder is replaced by a system error
    /// message and the user message is marked failed.
    pub async fn send_message(
        &self,
        text: &str,
        model: Option<&str>,
        images: Vec<String>,
    ) -> Result<Message, ChatError> {
        let model = self.check_send(text, model)?;
        let chat_id = self.ensure_conversation().await?;

        let user = Message::optimistic_user(&chat_id, text, images);
        let placeholder = Message::loading_placeholder(&chat_id);
        let (user_id, placeholder_id) = (user.local_id, placeholder.local_id);

        let (request, epoch) = {
            let mut state = self.lock();
            let mut messages = state.history();
            messages.push(ChatTurn::from(&user));
            let request = ApiRequest::post(CHAT_PATH).json(&OllamaChatRequest {
                model: model.clone(),
                messages,
                stream: false,
                chat_id: chat_id.clone(),
            })?;

            state.messages.push(user);
            state.set_delivery(user_id, Delivery::Pending);
            state.messages.push(placeholder);
            state.sending = true;
            state.error = None;
            (request, state.selection_epoch)
        };
        self.notify_messages(Some(chat_id.clone()));

        let result = self
            .inner
            .api
            .execute::<OllamaChatResponse>(&request, true)
            .await;

        // Any navigation since the send, even back to this chat, reloaded
        // the history from the server; the reply must not be added twice.
        let mut state = self.lock();
        state.sending = false;
        let still_current = state.selection_epoch == epoch;

        match result {
            Ok(response) => {
                let mut assistant = Message::assistant(&chat_id, response.id, response.message);
                assistant.model_id = Some(model);
                assistant.tokens_used = response.eval_count;

                if still_current {
                    state.remove_local(placeholder_id);
                    state.set_delivery(user_id, Delivery::Committed);
                    state.messages.push(assistant.clone());
                } else {
                    tracing::debug!(chat_id = %chat_id, "Reply arrived after navigation; not applied");
                }

                let renamed = match response.title.as_deref().map(str::trim) {
                    Some(title) if !title.is_empty() => {
                        state.rename(&chat_id, title);
                        true
                    }
                    _ => false,
                };
                drop(state);

                if renamed {
                    self.emit(StoreEvent::ConversationsChanged);
                }
                if still_current {
                    self.notify_messages(Some(chat_id));
                }
                Ok(assistant)
            }
            Err(e) => {
                if still_current {
                    state.remove_local(placeholder_id);
                    state.set_delivery(user_id, Delivery::Failed);
                    state.messages.push(Message::system_error(
                        Some(&chat_id),
                        &format!("Failed to send message: {}", e.user_message()),
                    ));
                }
                state.error = Some("Failed to send message".to_string());
                drop(state);

                tracing::error!(chat_id = %chat_id, error = %e, "Error sending message");
                self.inner.toasts.error("Failed to send message");
                if still_current {
                    self.notify_messages(Some(chat_id));
                }
                Err(e.into())
            }
        }
    }

    /// Persists a message without asking the model for a reply.
    pub async fn add_message(&self, role: Role, content: &str) -> Result<Message, ChatError> {
        let (chat_id, epoch) = {
            let state = self.lock();
            let chat_id = state
                .current_id()
                .map(str::to_string)
                .ok_or(ChatError::NoConversation)?;
            (chat_id, state.selection_epoch)
        };

        let request = ApiRequest::post(format!("chats/{chat_id}/messages"))
            .json(&json!({ "role": role, "content": content }))?;
        let message: Message = self.inner.api.execute(&request, true).await?;

        let applied = {
            let mut state = self.lock();
            let current = state.selection_epoch == epoch;
            if current {
                state.messages.push(message.clone());
            }
            current
        };
        if applied {
            self.notify_messages(Some(chat_id));
        }
        Ok(message)
    }

    /// Edits a message on the server, then in place: the local message
    /// keeps its identity and is flagged as edited.
    pub async fn update_message(
        &self,
        chat_id: &str,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<(), ApiError> {
        let request =
            ApiRequest::patch(format!("chats/{chat_id}/messages/{message_id}")).json(&update)?;
        if let Err(e) = self.inner.api.execute_empty(&request, true).await {
            tracing::error!(chat_id, message_id, error = %e, "Error updating message");
            self.inner.toasts.error("Failed to update message");
            return Err(e);
        }

        let found = {
            let mut state = self.lock();
            match state
                .messages
                .iter_mut()
                .find(|m| m.id.as_deref() == Some(message_id))
            {
                Some(msg) => {
                    msg.content = update.content;
                    if let Some(images) = update.images {
                        msg.images = images;
                    }
                    if let Some(metadata) = update.extended_metadata {
                        msg.extended_metadata = Some(metadata);
                    }
                    msg.edited = true;
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify_messages(Some(chat_id.to_string()));
        }
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), ApiError> {
        let request = ApiRequest::delete(format!("chats/{chat_id}/messages/{message_id}"));
        if let Err(e) = self.inner.api.execute_empty(&request, true).await {
            tracing::error!(chat_id, message_id, error = %e, "Error deleting message");
            self.inner.toasts.error("Failed to delete message");
            return Err(e);
        }

        self.lock()
            .messages
            .retain(|m| m.id.as_deref() != Some(message_id));
        self.notify_messages(Some(chat_id.to_string()));
        Ok(())
    }

    /// Deletes several messages at once. Ids the server reports as failed
    /// stay in the list.
    pub async fn bulk_delete_messages(
        &self,
        chat_id: &str,
        message_ids: &[String],
    ) -> Result<BulkDeleteResponse, ApiError> {
        let request = ApiRequest::delete(format!("chats/{chat_id}/messages/bulk")).json(
            &BulkDeleteRequest {
                message_ids: message_ids.to_vec(),
            },
        )?;
        let response: BulkDeleteResponse = match self.inner.api.execute(&request, true).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(chat_id, error = %e, "Error deleting messages");
                self.inner.toasts.error("Failed to delete messages");
                return Err(e);
            }
        };

        self.lock().messages.retain(|m| match m.id.as_deref() {
            Some(id) => {
                !message_ids.iter().any(|d| d == id)
                    || response.failed_deletions.iter().any(|f| f == id)
            }
            None => true,
        });
        if !response.failed_deletions.is_empty() {
            self.inner.toasts.warning(format!(
                "{} message(s) could not be deleted",
                response.failed_deletions.len()
            ));
        }
        self.notify_messages(Some(chat_id.to_string()));
        Ok(response)
    }

    pub async fn update_chat(&self, chat_id: &str, update: ChatUpdate) -> Result<(), ApiError> {
        let request = ApiRequest::patch(format!("chats/chat/{chat_id}")).json(&update)?;
        if let Err(e) = self.inner.api.execute_empty(&request, true).await {
            tracing::error!(chat_id, error = %e, "Error updating chat");
            self.inner.toasts.error("Failed to update chat");
            return Err(e);
        }

        let touched_current = {
            let mut state = self.lock();
            state.edit_conversation(chat_id, |conv| {
                if let Some(title) = &update.title {
                    conv.title = title.clone();
                }
                if let Some(archived) = update.is_archived {
                    conv.is_archived = archived;
                }
            });
            state.is_current(chat_id)
        };

        self.emit(StoreEvent::ConversationsChanged);
        if touched_current {
            self.notify_current();
        }
        Ok(())
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), ApiError> {
        let request = ApiRequest::delete(format!("chats/chat/{chat_id}"));
        if let Err(e) = self.inner.api.execute_empty(&request, true).await {
            tracing::error!(chat_id, error = %e, "Error deleting chat");
            self.inner.toasts.error("Failed to delete chat");
            return Err(e);
        }

        let was_current = self.lock().is_current(chat_id);
        if was_current {
            self.close_event_source();
        }
        {
            let mut state = self.lock();
            state.conversations.retain(|c| c.id != chat_id);
            if state.is_current(chat_id) {
                state.selection_epoch += 1;
                state.current = None;
                state.messages.clear();
            }
        }

        self.emit(StoreEvent::ConversationsChanged);
        if was_current {
            self.notify_current();
            self.notify_messages(None);
        }
        self.inner.toasts.success("Chat deleted successfully");
        Ok(())
    }

    /// Deletes every conversation the user owns.
    pub async fn delete_chats(&self) -> Result<(), ApiError> {
        if let Err(e) = self
            .inner
            .api
            .execute_empty(&ApiRequest::delete("chats/my"), true)
            .await
        {
            tracing::error!(error = %e, "Error deleting chats");
            self.inner.toasts.error("Failed to delete chats");
            return Err(e);
        }

        self.close_event_source();
        {
            let mut state = self.lock();
            state.selection_epoch += 1;
            state.conversations.clear();
            state.current = None;
            state.messages.clear();
        }
        self.emit(StoreEvent::ConversationsChanged);
        self.notify_current();
        self.notify_messages(None);
        self.inner.toasts.success("All chats deleted");
        Ok(())
    }

    /// Records the model choice for the current conversation.
    pub fn set_conversation_model(&self, model: &str) -> Result<(), ChatError> {
        {
            let mut state = self.lock();
            let chat_id = state
                .current_id()
                .map(str::to_string)
                .ok_or(ChatError::NoConversation)?;
            state.edit_conversation(&chat_id, |conv| conv.model = Some(model.to_string()));
        }
        self.emit(StoreEvent::ConversationsChanged);
        self.notify_current();
        Ok(())
    }

    /// Forgets everything belonging to the signed-in user.
    pub fn reset(&self) {
        self.close_event_source();
        {
            let mut state = self.lock();
            state.selection_epoch += 1;
            state.conversations.clear();
            state.current = None;
            state.messages.clear();
            state.error = None;
            state.loading = false;
            state.sending = false;
        }
        self.emit(StoreEvent::ConversationsChanged);
        self.notify_current();
        self.notify_messages(None);
    }
}
