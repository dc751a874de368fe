// src/api/mod.rs

pub mod client;
pub mod refresh;
pub mod session;

pub use client::{ApiClient, ApiRequest, LogoutHook};
pub use session::{Session, SessionState};
