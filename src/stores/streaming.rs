// src/stores/streaming.rs

use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{ApiError, ChatError};
use crate::events::StoreEvent;
use crate::stores::chat::{ChatStore, OpenChannel, CHAT_PATH};
use crate::types::{ChatTurn, Delivery, Message, OllamaChatRequest, StreamEvent};

const LOST_CONNECTION: &str = "Connection to the server was lost";

/// Handle to a running streamed reply.
pub struct StreamHandle {
    chat_id: String,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Resolves once the channel has finished, failed or been closed.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Stream task panicked");
        }
    }
}

/// Identifies what a driver task is allowed to touch.
struct StreamTarget {
    channel_id: u64,
    chat_id: String,
    user: Uuid,
    reply: Uuid,
}

impl ChatStore {
    /// Sends `text` and streams the assistant reply into a placeholder
    /// message. Any previously open channel is closed first.
    pub async fn stream_chat_response(
        &self,
        text: &str,
        model: Option<&str>,
        images: Vec<String>,
    ) -> Result<StreamHandle, ChatError> {
        let model = self.check_send(text, model)?;
        let chat_id = self.ensure_conversation().await?;
        self.close_event_source();

        let user = Message::optimistic_user(&chat_id, text, images);
        let reply = Message::streaming_placeholder(&chat_id);
        let (user_id, reply_id) = (user.local_id, reply.local_id);

        let (source, close_rx, channel_id) = {
            let mut state = self.lock();
            let mut messages = state.history();
            messages.push(ChatTurn::from(&user));
            let payload = serde_json::to_string(&OllamaChatRequest {
                model,
                messages,
                stream: true,
                chat_id: chat_id.clone(),
            })
            .map_err(ApiError::from)?;
            let path = format!(
                "{CHAT_PATH}/stream?payload={}",
                urlencoding::encode(&payload)
            );
            let source = self.inner.api.event_source(&path)?;

            let (close_tx, close_rx) = oneshot::channel();
            state.next_channel_id += 1;
            let channel_id = state.next_channel_id;
            state.channel = Some(OpenChannel {
                id: channel_id,
                chat_id: chat_id.clone(),
                close_tx,
            });
            state.messages.push(user);
            state.set_delivery(user_id, Delivery::Pending);
            state.messages.push(reply);
            state.streaming = true;
            state.error = None;
            (source, close_rx, channel_id)
        };

        tracing::debug!(chat_id = %chat_id, channel_id, "Opened stream channel");
        self.emit(StoreEvent::MessagesChanged {
            chat_id: Some(chat_id.clone()),
        });
        self.emit(StoreEvent::StreamStarted {
            chat_id: chat_id.clone(),
        });

        let target = StreamTarget {
            channel_id,
            chat_id: chat_id.clone(),
            user: user_id,
            reply: reply_id,
        };
        let store = self.clone();
        let task = tokio::spawn(async move { store.drive_stream(source, close_rx, target).await });

        Ok(StreamHandle { chat_id, task })
    }

    async fn drive_stream(
        self,
        mut source: EventSource,
        mut close_rx: oneshot::Receiver<()>,
        target: StreamTarget,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut close_rx => {
                    tracing::debug!(channel_id = target.channel_id, "Stream closed locally");
                    break;
                }
                event = source.next() => event,
            };

            match event {
                Some(Ok(Event::Open)) => {
                    tracing::debug!(channel_id = target.channel_id, "Stream connected");
                }
                Some(Ok(Event::Message(msg))) => {
                    let parsed = match serde_json::from_str::<StreamEvent>(&msg.data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping malformed stream event");
                            continue;
                        }
                    };
                    if !self.apply_stream_event(&target, parsed) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(channel_id = target.channel_id, error = %e, "Stream error");
                    self.fail_stream(&target, LOST_CONNECTION);
                    break;
                }
                None => {
                    tracing::warn!(channel_id = target.channel_id, "Stream ended before completion");
                    self.fail_stream(&target, LOST_CONNECTION);
                    break;
                }
            }
        }
        source.close();
    }

    /// Applies one event. Returns whether the channel should stay open.
    fn apply_stream_event(&self, target: &StreamTarget, event: StreamEvent) -> bool {
        if let Some(error) = event.error {
            self.fail_stream(target, &error);
            return false;
        }

        let mut state = self.lock();
        if state.channel.as_ref().map(|c| c.id) != Some(target.channel_id) {
            return false;
        }

        let delta = event.content.unwrap_or_default();
        let thinking_delta = event.thinking.unwrap_or_default();
        if let Some(reply) = state.message_mut(target.reply) {
            if reply.id.is_none() {
                reply.id = event.id;
            }
            reply.content.push_str(&delta);
            if !thinking_delta.is_empty() {
                reply
                    .thinking
                    .get_or_insert_with(String::new)
                    .push_str(&thinking_delta);
            }
            if event.done {
                reply.is_streaming = false;
                reply.delivery = Delivery::Committed;
            }
        }

        if event.done {
            state.set_delivery(target.user, Delivery::Committed);
            state.channel = None;
            state.streaming = false;
            drop(state);

            tracing::debug!(channel_id = target.channel_id, "Stream complete");
            self.emit(StoreEvent::StreamEnded {
                chat_id: target.chat_id.clone(),
                failed: false,
            });
            self.emit(StoreEvent::MessagesChanged {
                chat_id: Some(target.chat_id.clone()),
            });
            return false;
        }
        drop(state);

        if !delta.is_empty() || !thinking_delta.is_empty() {
            self.emit(StoreEvent::StreamDelta {
                chat_id: target.chat_id.clone(),
                delta,
                thinking_delta,
            });
        }
        true
    }

    /// Replaces the placeholder with a visible error and closes the channel.
    fn fail_stream(&self, target: &StreamTarget, reason: &str) {
        {
            let mut state = self.lock();
            if state.channel.as_ref().map(|c| c.id) != Some(target.channel_id) {
                return;
            }
            state.channel = None;
            state.streaming = false;
            state.remove_local(target.reply);
            state.set_delivery(target.user, Delivery::Failed);
            state.messages.push(Message::system_error(
                Some(&target.chat_id),
                &format!("Error: {reason}"),
            ));
            state.error = Some("Failed to get response".to_string());
        }

        self.inner.toasts.error("Failed to get response");
        self.emit(StoreEvent::StreamEnded {
            chat_id: target.chat_id.clone(),
            failed: true,
        });
        self.emit(StoreEvent::MessagesChanged {
            chat_id: Some(target.chat_id.clone()),
        });
    }

    /// Closes the open channel, if any. Messages still marked as streaming
    /// keep their content and stop streaming. Safe to call at any time.
    pub fn close_event_source(&self) {
        let (closed, chat_id) = {
            let mut state = self.lock();
            let channel = state.channel.take();
            state.streaming = false;
            let mut touched = false;
            for msg in state.messages.iter_mut().filter(|m| m.is_streaming) {
                msg.is_streaming = false;
                touched = true;
            }
            match channel {
                Some(channel) => {
                    // The driver may already be gone.
                    let _ = channel.close_tx.send(());
                    (true, Some(channel.chat_id))
                }
                None => (touched, state.current_id().map(str::to_string)),
            }
        };

        if let (true, Some(chat_id)) = (closed, chat_id) {
            self.emit(StoreEvent::StreamEnded {
                chat_id: chat_id.clone(),
                failed: false,
            });
            self.emit(StoreEvent::MessagesChanged {
                chat_id: Some(chat_id),
            });
        }
    }
}
