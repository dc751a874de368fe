// src/preferences.rs

use crate::db::LocalStorage;

const SIDEBAR_KEY: &str = "sidebarVisible";
const REMEMBER_KEY: &str = "remember_username";
const USERNAME_KEY: &str = "saved_username";
const PREFERRED_MODEL_KEY: &str = "preferredModel";

/// Small UI preferences kept in local storage across runs.
#[derive(Clone)]
pub struct Preferences {
    storage: LocalStorage,
}

impl Preferences {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    /// Visible unless the user hid it.
    pub fn sidebar_visible(&self) -> bool {
        self.storage.get_bool(SIDEBAR_KEY).unwrap_or(true)
    }

    pub fn toggle_sidebar(&self) -> bool {
        let visible = !self.sidebar_visible();
        self.storage.set_bool(SIDEBAR_KEY, visible);
        visible
    }

    pub fn remember_username(&self) -> bool {
        self.storage.get_bool(REMEMBER_KEY).unwrap_or(false)
    }

    /// Turning remembering off also forgets the saved name.
    pub fn set_remember_username(&self, remember: bool) {
        self.storage.set_bool(REMEMBER_KEY, remember);
        if !remember {
            self.storage.remove(USERNAME_KEY);
        }
    }

    pub fn saved_username(&self) -> Option<String> {
        if self.remember_username() {
            self.storage.get(USERNAME_KEY).filter(|u| !u.is_empty())
        } else {
            None
        }
    }

    pub fn save_username(&self, username: &str) {
        if self.remember_username() && !username.is_empty() {
            self.storage.set(USERNAME_KEY, username);
        }
    }

    pub fn clear_username(&self) {
        self.storage.remove(USERNAME_KEY);
    }

    pub fn preferred_model(&self) -> Option<String> {
        self.storage.get(PREFERRED_MODEL_KEY).filter(|m| !m.is_empty())
    }

    pub fn set_preferred_model(&self, model: &str) {
        self.storage.set(PREFERRED_MODEL_KEY, model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_only_saved_when_remembering() {
        let prefs = Preferences::new(LocalStorage::in_memory().unwrap());
        prefs.save_username("alice");
        assert_eq!(prefs.saved_username(), None);

        prefs.set_remember_username(true);
        prefs.save_username("alice");
        assert_eq!(prefs.saved_username().as_deref(), Some("alice"));

        prefs.set_remember_username(false);
        prefs.set_remember_username(true);
        assert_eq!(prefs.saved_username(), None);
    }

    #[test]
    fn test_sidebar_toggle_persists() {
        let prefs = Preferences::new(LocalStorage::in_memory().unwrap());
        assert!(prefs.sidebar_visible());
        assert!(!prefs.toggle_sidebar());
        assert!(!prefs.sidebar_visible());
    }
}
