// src/types/mod.rs

pub mod admin;
pub mod auth;
pub mod chat;
pub mod model;
pub mod serde_util;

pub use admin::*;
pub use auth::*;
pub use chat::*;
pub use model::*;
