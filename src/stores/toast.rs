// src/stores/toast.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::events::{EventBus, StoreEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Info,
    Warning,
}

#[derive(Clone, Debug)]
pub struct Toast {
    pub id: u64,
    pub message: String,
    pub kind: ToastKind,
    /// Zero means the toast stays until removed.
    pub duration: Duration,
    pub created: Instant,
}

impl Toast {
    fn expired(&self, now: Instant) -> bool {
        !self.duration.is_zero() && now.duration_since(self.created) >= self.duration
    }
}

struct ToastInner {
    next_id: AtomicU64,
    toasts: Mutex<Vec<Toast>>,
    default_duration: Duration,
    events: EventBus,
}

#[derive(Clone)]
pub struct ToastStore {
    inner: Arc<ToastInner>,
}

impl ToastStore {
    pub fn new(default_duration: Duration, events: EventBus) -> Self {
        Self {
            inner: Arc::new(ToastInner {
                next_id: AtomicU64::new(0),
                toasts: Mutex::new(Vec::new()),
                default_duration,
                events,
            }),
        }
    }

    pub fn add(&self, message: impl Into<String>, kind: ToastKind, duration: Option<Duration>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let message = message.into();
        self.inner.toasts.lock().push(Toast {
            id,
            message: message.clone(),
            kind,
            duration: duration.unwrap_or(self.inner.default_duration),
            created: Instant::now(),
        });
        self.inner
            .events
            .emit(StoreEvent::ToastAdded { id, kind, message });
        id
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.add(message, ToastKind::Success, None)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.add(message, ToastKind::Error, None)
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.add(message, ToastKind::Info, None)
    }

    pub fn warning(&self, message: impl Into<String>) -> u64 {
        self.add(message, ToastKind::Warning, None)
    }

    pub fn remove(&self, id: u64) {
        let removed = {
            let mut toasts = self.inner.toasts.lock();
            let before = toasts.len();
            toasts.retain(|t| t.id != id);
            toasts.len() != before
        };
        if removed {
            self.inner.events.emit(StoreEvent::ToastRemoved { id });
        }
    }

    pub fn clear_all(&self) {
        let ids: Vec<u64> = self.inner.toasts.lock().drain(..).map(|t| t.id).collect();
        for id in ids {
            self.inner.events.emit(StoreEvent::ToastRemoved { id });
        }
    }

    /// Visible toasts, oldest first. Expired ones are dropped here.
    pub fn active(&self) -> Vec<Toast> {
        let now = Instant::now();
        let (live, expired) = {
            let mut toasts = self.inner.toasts.lock();
            let expired: Vec<u64> = toasts
                .iter()
                .filter(|t| t.expired(now))
                .map(|t| t.id)
                .collect();
            toasts.retain(|t| !t.expired(now));
            (toasts.clone(), expired)
        };
        for id in expired {
            self.inner.events.emit(StoreEvent::ToastRemoved { id });
        }
        live
    }
}
