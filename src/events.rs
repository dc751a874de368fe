// src/events.rs

use tokio::sync::broadcast;

use crate::stores::toast::ToastKind;

const EVENT_CAPACITY: usize = 256;

/// State-change notifications for whatever renders the stores.
/// Payloads carry identifiers and deltas; the full state is read back
/// through store snapshots.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    SessionChanged {
        authenticated: bool,
    },
    ConversationsChanged,
    CurrentConversationChanged {
        chat_id: Option<String>,
    },
    MessagesChanged {
        chat_id: Option<String>,
    },
    StreamStarted {
        chat_id: String,
    },
    StreamDelta {
        chat_id: String,
        delta: String,
        thinking_delta: String,
    },
    StreamEnded {
        chat_id: String,
        failed: bool,
    },
    ToastAdded {
        id: u64,
        kind: ToastKind,
        message: String,
    },
    ToastRemoved {
        id: u64,
    },
    ModelsChanged,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
