// src/api/refresh.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

struct Running {
    future: RefreshFuture,
    finished: Arc<AtomicBool>,
}

/// At most one token refresh in flight. Callers arriving while a refresh
/// runs await the same future and observe the same outcome.
///
/// The refresh itself runs as its own task, so a caller that gives up
/// (a timeout, a dropped request) cannot leave it half-finished.
#[derive(Default)]
pub struct RefreshGate {
    slot: Mutex<Option<Running>>,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .is_some_and(|running| !running.finished.load(Ordering::SeqCst))
    }

    /// Forgets the running refresh. Later callers start a new one; current
    /// waiters still get the old outcome.
    pub fn reset(&self) {
        if self.slot.lock().take().is_some() {
            tracing::debug!("Dropped in-flight token refresh");
        }
    }

    /// Joins the running refresh, or starts one with `start`.
    pub async fn run<F>(&self, start: F) -> bool
    where
        F: FnOnce() -> BoxFuture<'static, bool>,
    {
        let refresh = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                // A finished refresh left behind by callers that went away
                // is stale; only a running one is joined.
                Some(running) if !running.finished.load(Ordering::SeqCst) => {
                    tracing::debug!("Joining in-flight token refresh");
                    running.future.clone()
                }
                _ => {
                    let finished = Arc::new(AtomicBool::new(false));
                    let done = finished.clone();
                    let work = start();
                    let task = tokio::spawn(async move {
                        let outcome = work.await;
                        done.store(true, Ordering::SeqCst);
                        outcome
                    });
                    let future = async move {
                        task.await.unwrap_or_else(|e| {
                            tracing::error!(error = %e, "Token refresh task failed");
                            false
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(Running {
                        future: future.clone(),
                        finished,
                    });
                    future
                }
            }
        };

        let outcome = refresh.clone().await;

        let mut slot = self.slot.lock();
        if slot
            .as_ref()
            .is_some_and(|current| current.future.ptr_eq(&refresh))
        {
            *slot = None;
        }
        outcome
    }
}
