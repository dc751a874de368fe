mod common;

use std::time::Duration;

use common::{context, sign_in, user_json};
use ollachat_lib::api::ApiRequest;
use ollachat_lib::types::{LoginCredentials, User};
use ollachat_lib::ApiError;
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn concurrent_401s_share_a_single_refresh() {
    let server = MockServer::start().await;
    let ctx = context(&server);
    sign_in(&ctx);

    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Token expired"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "alice", "user")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .and(body_json(json!({"refresh_token": "refresh-1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": "access-2",
                    "refresh_token": "refresh-2",
                    "token_type": "bearer"
                }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let api = ctx.api.clone();
        handles.push(tokio::spawn(async move {
            api.execute::<User>(&ApiRequest::get("users/me"), true).await
        }));
    }

    for handle in handles {
        let user = handle.await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
    }
    assert_eq!(ctx.api.session().access_token().as_deref(), Some("access-2"));
    assert_eq!(ctx.storage.get("refresh_token").as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn failed_refresh_fails_every_waiter_and_logs_out() {
    let server = MockServer::start().await;
    let ctx = context(&server);
    sign_in(&ctx);

    Mock::given(method("GET"))
        .and(path("/api/v1/chats/my"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(150)))
        .expect(1)
        .mount(&server)
        .await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let api = ctx.api.clone();
        handles.push(tokio::spawn(async move {
            api.execute::<serde_json::Value>(&ApiRequest::get("chats/my"), true)
                .await
        }));
    }

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ApiError::SessionExpired), "got {err:?}");
    }
    assert!(!ctx.auth.is_authenticated());
    assert_eq!(ctx.storage.get("access_token"), None);
}

#[tokio::test]
async fn logout_twice_calls_the_server_once() {
    let server = MockServer::start().await;
    let ctx = context(&server);
    sign_in(&ctx);

    Mock::given(method("DELETE"))
        .and(path("/api/v1/auth/logout"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(ctx.auth.logout().await);
    assert!(!ctx.auth.is_authenticated());
    assert!(!ctx.auth.logout().await);
    assert!(!ctx.auth.is_authenticated());
    assert_eq!(ctx.storage.get("refresh_token"), None);
}

#[tokio::test]
async fn logout_clears_state_even_when_server_is_down() {
    let server = MockServer::start().await;
    let ctx = context(&server);
    sign_in(&ctx);

    Mock::given(method("DELETE"))
        .and(path("/api/v1/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(ctx.auth.logout().await);
    assert!(!ctx.auth.is_authenticated());
}

#[tokio::test]
async fn login_stores_tokens_and_loads_profile() {
    let server = MockServer::start().await;
    let ctx = context(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(body_string_contains("username=alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "alice", "user")))
        .mount(&server)
        .await;

    let user = ctx
        .auth
        .login(&LoginCredentials {
            username: "alice".into(),
            password: "secret123".into(),
        })
        .await
        .unwrap();

    assert_eq!(user.unwrap().username, "alice");
    assert!(ctx.auth.is_authenticated());
    assert!(!ctx.auth.is_admin());
    assert_eq!(ctx.storage.get("access_token").as_deref(), Some("access-1"));
}

#[tokio::test]
async fn failed_login_stays_logged_out_with_backend_message() {
    let server = MockServer::start().await;
    let ctx = context(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Incorrect username or password"})),
        )
        .mount(&server)
        .await;

    let err = ctx
        .auth
        .login(&LoginCredentials {
            username: "alice".into(),
            password: "wrong".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.user_message(), "Incorrect username or password");
    assert!(!ctx.auth.is_authenticated());
    assert_eq!(
        ctx.auth.last_error().as_deref(),
        Some("Incorrect username or password")
    );
}

#[tokio::test]
async fn profile_fetch_refreshes_once_on_403() {
    let server = MockServer::start().await;
    let ctx = context(&server);
    sign_in(&ctx);

    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "alice", "admin")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "access-2"})))
        .expect(1)
        .mount(&server)
        .await;

    let user = ctx.auth.fetch_user_profile().await.unwrap();
    assert!(user.role == ollachat_lib::types::UserRole::Admin);
    assert!(ctx.auth.is_admin());
    // No refresh token came back, so the old one is kept.
    assert_eq!(ctx.api.session().refresh_token().as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn profile_fetch_logs_out_when_retry_still_rejected() {
    let server = MockServer::start().await;
    let ctx = context(&server);
    sign_in(&ctx);

    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "access-2"})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(ctx.auth.fetch_user_profile().await.is_none());
    assert!(!ctx.auth.is_authenticated());
}

#[tokio::test]
async fn initialize_logs_out_when_profile_fetch_times_out() {
    let server = MockServer::start().await;
    let config = ollachat_lib::settings::ClientConfig {
        api_base_url: server.uri(),
        profile_timeout_secs: 1,
        ..Default::default()
    };
    let ctx = ollachat_lib::AppContext::new(
        config,
        ollachat_lib::db::LocalStorage::in_memory().unwrap(),
    )
    .unwrap();
    sign_in(&ctx);

    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(user_json("u1", "alice", "user"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    ctx.auth.initialize().await;
    assert!(!ctx.auth.is_authenticated());

    // Runs once: a second call does nothing even with a fresh session.
    sign_in(&ctx);
    ctx.auth.initialize().await;
    assert!(ctx.auth.is_authenticated());
}

#[tokio::test]
async fn validation_errors_are_normalized() {
    let server = MockServer::start().await;
    let ctx = context(&server);

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/register"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "detail": [
                {"loc": ["body", "email"], "msg": "value is not a valid email address", "type": "value_error.email"}
            ]
        })))
        .mount(&server)
        .await;

    let err = ctx
        .auth
        .register(&ollachat_lib::types::Registration {
            username: "alice".into(),
            email: "nope".into(),
            password: "secret123".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Validation error: email - value is not a valid email address"
    );
    assert_eq!(err.field_errors()[0].kind, "value_error.email");
    assert!(!ctx.auth.is_authenticated());
}

#[tokio::test]
async fn refresh_cut_off_at_startup_does_not_leak_into_the_next_session() {
    let server = MockServer::start().await;
    let config = ollachat_lib::settings::ClientConfig {
        api_base_url: server.uri(),
        profile_timeout_secs: 1,
        ..Default::default()
    };
    let ctx = ollachat_lib::AppContext::new(
        config,
        ollachat_lib::db::LocalStorage::in_memory().unwrap(),
    )
    .unwrap();
    sign_in(&ctx);

    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", "Bearer access-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "alice", "user")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .and(body_json(json!({"refresh_token": "refresh-1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "access-2", "refresh_token": "refresh-2"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .and(body_json(json!({"refresh_token": "refresh-3"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "access-4", "refresh_token": "refresh-4"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-3",
            "refresh_token": "refresh-3"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/chats/my"))
        .and(header("authorization", "Bearer access-3"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/chats/my"))
        .and(header("authorization", "Bearer access-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"chats": [], "total": 0})))
        .mount(&server)
        .await;

    // The profile fetch is stuck in a slow refresh when the startup timeout hits.
    ctx.auth.initialize().await;
    assert!(!ctx.auth.is_authenticated());

    ctx.auth
        .login(&LoginCredentials {
            username: "alice".into(),
            password: "secret123".into(),
        })
        .await
        .unwrap();
    assert_eq!(ctx.api.session().access_token().as_deref(), Some("access-3"));

    let chats: serde_json::Value = ctx
        .api
        .execute(&ApiRequest::get("chats/my"), true)
        .await
        .unwrap();
    assert_eq!(chats["total"], 0);

    // Let the abandoned refresh land; it must not overwrite the new pair.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(ctx.auth.is_authenticated());
    assert_eq!(ctx.api.session().access_token().as_deref(), Some("access-4"));
    assert_eq!(ctx.storage.get("refresh_token").as_deref(), Some("refresh-4"));
}

#[tokio::test]
async fn failed_refresh_drops_the_previous_users_chats() {
    let server = MockServer::start().await;
    let ctx = context(&server);
    sign_in(&ctx);

    Mock::given(method("GET"))
        .and(path("/api/v1/chats/my"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chats": [common::chat_json("c1", "Secret plans")],
            "total": 1
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/chats/chat/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chat": common::chat_json("c1", "Secret plans"),
            "messages": [common::message_json("m1", "c1", "user", "hello")]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    ctx.chat.fetch_chats().await.unwrap();
    ctx.chat.load_chat("c1").await.unwrap();
    assert_eq!(ctx.chat.messages().len(), 1);

    let err = ctx
        .api
        .execute::<User>(&ApiRequest::get("users/me"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired));

    assert!(!ctx.auth.is_authenticated());
    assert!(ctx.chat.messages().is_empty());
    assert!(ctx.chat.conversations().is_empty());
    assert!(ctx.chat.current_conversation().is_none());
}
