// src/api/session.rs

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::db::LocalStorage;
use crate::events::{EventBus, StoreEvent};
use crate::settings::AuthMode;
use crate::types::User;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const AUTHENTICATED_KEY: &str = "authenticated";

#[derive(Clone, Debug, Default)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub authenticated: bool,
    pub user: Option<User>,
}

/// The token store's state: in memory, mirrored to local storage.
///
/// Every credential change bumps `epoch`, which lets the pipeline tell a
/// stale 401 (sent before a refresh landed) from a fresh one.
pub struct SessionState {
    mode: AuthMode,
    inner: Mutex<Session>,
    epoch: AtomicU64,
    storage: LocalStorage,
    events: EventBus,
}

impl SessionState {
    /// Rebuilds the session from whatever a previous run persisted.
    pub fn restore(mode: AuthMode, storage: LocalStorage, events: EventBus) -> Self {
        let access_token = match mode {
            AuthMode::Bearer => storage.get(ACCESS_TOKEN_KEY),
            AuthMode::Cookie => None,
        };
        let refresh_token = storage.get(REFRESH_TOKEN_KEY);
        let authenticated = match mode {
            AuthMode::Bearer => access_token.is_some(),
            AuthMode::Cookie => storage.get_bool(AUTHENTICATED_KEY).unwrap_or(false),
        };

        tracing::debug!(?mode, authenticated, "Restored session");

        Self {
            mode,
            inner: Mutex::new(Session {
                access_token,
                refresh_token,
                authenticated,
                user: None,
            }),
            epoch: AtomicU64::new(0),
            storage,
            events,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn snapshot(&self) -> Session {
        self.inner.lock().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().authenticated
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.lock().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.lock().refresh_token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.lock().user.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Bearer token and epoch read under one lock, so a request can later
    /// ask whether the credentials it carried are still current.
    pub fn credentials(&self) -> (Option<String>, u64) {
        let session = self.inner.lock();
        let token = match self.mode {
            AuthMode::Bearer => session.access_token.clone(),
            AuthMode::Cookie => None,
        };
        (token, self.epoch())
    }

    /// Stores a fresh token pair. A missing refresh token keeps the old one.
    pub fn set_tokens(&self, access_token: String, refresh_token: Option<String>) {
        self.store_tokens(None, access_token, refresh_token);
    }

    /// Like `set_tokens`, but only while the credentials are still those of
    /// `epoch`. Returns whether the pair was stored.
    pub fn set_tokens_if_current(&self, epoch: u64, access_token: String, refresh_token: Option<String>) -> bool {
        self.store_tokens(Some(epoch), access_token, refresh_token)
    }

    fn store_tokens(&self, expected_epoch: Option<u64>, access_token: String, refresh_token: Option<String>) -> bool {
        let was_authenticated = {
            let mut session = self.inner.lock();
            if expected_epoch.is_some_and(|epoch| epoch != self.epoch()) {
                return false;
            }
            let was = session.authenticated;

            if self.mode == AuthMode::Bearer {
                self.storage.set(ACCESS_TOKEN_KEY, &access_token);
            }
            if let Some(refresh) = &refresh_token {
                self.storage.set(REFRESH_TOKEN_KEY, refresh);
                session.refresh_token = Some(refresh.clone());
            }
            self.storage.set_bool(AUTHENTICATED_KEY, true);

            session.access_token = Some(access_token);
            session.authenticated = true;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            was
        };

        if !was_authenticated {
            self.events.emit(StoreEvent::SessionChanged {
                authenticated: true,
            });
        }
        true
    }

    pub fn set_user(&self, user: Option<User>) {
        self.inner.lock().user = user;
    }

    /// Drops every credential, in memory and on disk. Returns the session
    /// that was replaced when one existed, `None` if already logged out.
    pub fn clear(&self) -> Option<Session> {
        let previous = {
            let mut session = self.inner.lock();
            if !session.authenticated
                && session.access_token.is_none()
                && session.refresh_token.is_none()
            {
                return None;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            std::mem::take(&mut *session)
        };

        self.storage.remove(ACCESS_TOKEN_KEY);
        self.storage.remove(REFRESH_TOKEN_KEY);
        self.storage.remove(AUTHENTICATED_KEY);

        self.events.emit(StoreEvent::SessionChanged {
            authenticated: false,
        });
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(mode: AuthMode) -> (SessionState, LocalStorage) {
        let storage = LocalStorage::in_memory().unwrap();
        (
            SessionState::restore(mode, storage.clone(), EventBus::new()),
            storage,
        )
    }

    #[test]
    fn test_tokens_persist_and_restore() {
        let (session, storage) = state(AuthMode::Bearer);
        assert!(!session.is_authenticated());

        session.set_tokens("a1".into(), Some("r1".into()));
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).as_deref(), Some("a1"));

        let restored = SessionState::restore(AuthMode::Bearer, storage, EventBus::new());
        assert!(restored.is_authenticated());
        assert_eq!(restored.refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_cookie_mode_keeps_access_token_off_disk() {
        let (session, storage) = state(AuthMode::Cookie);
        session.set_tokens("a1".into(), Some("r1".into()));

        assert_eq!(storage.get(ACCESS_TOKEN_KEY), None);
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
        assert_eq!(session.credentials().0, None);

        let restored = SessionState::restore(AuthMode::Cookie, storage, EventBus::new());
        assert!(restored.is_authenticated());
    }

    #[test]
    fn test_clear_is_idempotent_and_bumps_epoch() {
        let (session, storage) = state(AuthMode::Bearer);
        session.set_tokens("a1".into(), None);
        let epoch = session.epoch();

        let previous = session.clear().unwrap();
        assert_eq!(previous.access_token.as_deref(), Some("a1"));
        assert!(session.epoch() > epoch);
        assert_eq!(storage.get(ACCESS_TOKEN_KEY), None);

        assert!(session.clear().is_none());
    }

    #[test]
    fn test_tokens_from_an_ended_session_are_rejected() {
        let (session, storage) = state(AuthMode::Bearer);
        session.set_tokens("a1".into(), Some("r1".into()));
        let epoch = session.epoch();

        session.clear();
        session.set_tokens("a3".into(), Some("r3".into()));

        assert!(!session.set_tokens_if_current(epoch, "a2".into(), Some("r2".into())));
        assert_eq!(session.access_token().as_deref(), Some("a3"));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).as_deref(), Some("r3"));

        let epoch = session.epoch();
        assert!(session.set_tokens_if_current(epoch, "a4".into(), None));
        assert_eq!(session.access_token().as_deref(), Some("a4"));
    }

    #[test]
    fn test_missing_refresh_token_keeps_previous() {
        let (session, _) = state(AuthMode::Bearer);
        session.set_tokens("a1".into(), Some("r1".into()));
        session.set_tokens("a2".into(), None);
        assert_eq!(session.refresh_token().as_deref(), Some("r1"));
        assert_eq!(session.access_token().as_deref(), Some("a2"));
    }
}
