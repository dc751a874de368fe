#![allow(dead_code)]

use ollachat_lib::db::LocalStorage;
use ollachat_lib::settings::ClientConfig;
use ollachat_lib::types::{User, UserRole};
use ollachat_lib::AppContext;
use serde_json::{json, Value};
use wiremock::MockServer;

pub fn context_for(base_url: &str) -> AppContext {
    let config = ClientConfig {
        api_base_url: base_url.to_string(),
        ..ClientConfig::default()
    };
    AppContext::new(config, LocalStorage::in_memory().unwrap()).unwrap()
}

pub fn context(server: &MockServer) -> AppContext {
    context_for(&server.uri())
}

pub fn sign_in(ctx: &AppContext) {
    ctx.api
        .session()
        .set_tokens("access-1".to_string(), Some("refresh-1".to_string()));
}

pub fn user_json(id: &str, username: &str, role: &str) -> Value {
    json!({
        "id": id,
        "username": username,
        "email": format!("{username}@example.com"),
        "is_active": true,
        "role": role,
        "created_at": "2024-05-01T10:00:00",
        "last_login": null
    })
}

pub fn sign_in_as_admin(ctx: &AppContext) {
    sign_in(ctx);
    let user: User = serde_json::from_value(user_json("u-admin", "root", "admin")).unwrap();
    assert_eq!(user.role, UserRole::Admin);
    ctx.api.session().set_user(Some(user));
}

pub fn chat_json(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "user_id": "u1",
        "title": title,
        "is_archived": false,
        "created_at": "2024-05-01T10:00:00",
        "updated_at": "2024-05-01T10:00:00"
    })
}

pub fn message_json(id: &str, chat_id: &str, role: &str, content: &str) -> Value {
    json!({
        "id": id,
        "chat_id": chat_id,
        "role": role,
        "content": content,
        "images": null,
        "created_at": "2024-05-01T10:00:01"
    })
}

/// A port nothing listens on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

/// Server-sent events body from JSON payloads.
pub fn sse_body(events: &[Value]) -> Vec<u8> {
    events
        .iter()
        .map(|e| format!("data: {e}\n\n"))
        .collect::<String>()
        .into_bytes()
}
