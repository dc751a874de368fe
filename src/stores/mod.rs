// src/stores/mod.rs

pub mod admin;
pub mod auth;
pub mod chat;
pub mod models;
pub mod streaming;
pub mod toast;
pub mod user_settings;

pub use admin::AdminStore;
pub use auth::AuthStore;
pub use chat::ChatStore;
pub use models::{ModelStatus, ModelsStore};
pub use streaming::StreamHandle;
pub use toast::{Toast, ToastKind, ToastStore};
pub use user_settings::UserSettingsStore;
