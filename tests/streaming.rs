mod common;

use std::time::Duration;

use common::{chat_json, context, sign_in, sse_body};
use ollachat_lib::types::{Delivery, Role};
use ollachat_lib::StoreEvent;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM_PATH: &str = "/api/v1/ollama/chat/stream";

async fn signed_in_with_chat(server: &MockServer) -> ollachat_lib::AppContext {
    let ctx = context(server);
    sign_in(&ctx);
    Mock::given(method("POST"))
        .and(path("/api/v1/chats/my"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_json("c1", "New Chat")))
        .mount(server)
        .await;
    ctx
}

fn event_stream(events: &[Value]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(sse_body(events), "text/event-stream")
}

#[tokio::test]
async fn deltas_accumulate_into_one_reply() {
    let server = MockServer::start().await;
    let ctx = signed_in_with_chat(&server).await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(event_stream(&[
            json!({"content": "Hi"}),
            json!({"content": " there", "thinking": "greeting"}),
            json!({"done": true, "id": "m9"}),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let mut events = ctx.events.subscribe();
    let handle = ctx
        .chat
        .stream_chat_response("Hello", Some("llama3"), vec![])
        .await
        .unwrap();
    assert_eq!(handle.chat_id(), "c1");
    handle.finished().await;

    let messages = ctx.chat.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "Hello");
    assert_eq!(messages[0].delivery, Delivery::Committed);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hi there");
    assert_eq!(messages[1].thinking.as_deref(), Some("greeting"));
    assert_eq!(messages[1].id.as_deref(), Some("m9"));
    assert!(!messages[1].is_streaming);
    assert!(!ctx.chat.is_streaming());
    assert!(!ctx.chat.has_open_channel());

    let mut saw_end = false;
    while let Ok(event) = events.try_recv() {
        if event == (StoreEvent::StreamEnded { chat_id: "c1".into(), failed: false }) {
            saw_end = true;
        }
    }
    assert!(saw_end);
}

#[tokio::test]
async fn stream_request_carries_history_and_token() {
    let server = MockServer::start().await;
    let ctx = signed_in_with_chat(&server).await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(event_stream(&[json!({"content": "ok", "done": true})]))
        .mount(&server)
        .await;

    let handle = ctx
        .chat
        .stream_chat_response("Hello", Some("llama3"), vec![])
        .await
        .unwrap();
    handle.finished().await;

    let requests = server.received_requests().await.unwrap();
    let stream = requests
        .iter()
        .find(|r| r.url.path() == STREAM_PATH)
        .unwrap();
    assert_eq!(
        stream.headers.get("authorization").unwrap().to_str().unwrap(),
        "Bearer access-1"
    );
    let payload = stream
        .url
        .query_pairs()
        .find(|(k, _)| k == "payload")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    let payload: Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(
        payload,
        json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "Hello"}],
            "stream": true,
            "chatId": "c1"
        })
    );
}

#[tokio::test]
async fn error_event_replaces_placeholder() {
    let server = MockServer::start().await;
    let ctx = signed_in_with_chat(&server).await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(event_stream(&[
            json!({"content": "partial"}),
            json!({"error": "model not found"}),
        ]))
        .mount(&server)
        .await;

    let handle = ctx
        .chat
        .stream_chat_response("Hello", Some("missing"), vec![])
        .await
        .unwrap();
    handle.finished().await;

    let messages = ctx.chat.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].delivery, Delivery::Failed);
    assert!(messages[1].is_error);
    assert_eq!(messages[1].content, "Error: model not found");
    assert!(!messages.iter().any(|m| m.is_streaming));
    assert!(!ctx.chat.has_open_channel());
    assert_eq!(ctx.chat.last_error().as_deref(), Some("Failed to get response"));
}

#[tokio::test]
async fn stream_ending_without_done_is_a_lost_connection() {
    let server = MockServer::start().await;
    let ctx = signed_in_with_chat(&server).await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(event_stream(&[json!({"content": "Hi"})]))
        .mount(&server)
        .await;

    let handle = ctx
        .chat
        .stream_chat_response("Hello", Some("llama3"), vec![])
        .await
        .unwrap();
    handle.finished().await;

    let messages = ctx.chat.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "Error: Connection to the server was lost");
    assert!(!ctx.chat.is_streaming());
}

#[tokio::test]
async fn closing_mid_stream_keeps_partial_reply() {
    let server = MockServer::start().await;
    let ctx = signed_in_with_chat(&server).await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(event_stream(&[json!({"content": "late"})]).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let handle = ctx
        .chat
        .stream_chat_response("Hello", Some("llama3"), vec![])
        .await
        .unwrap();
    assert!(ctx.chat.is_streaming());
    assert!(ctx.chat.has_open_channel());

    ctx.chat.close_event_source();
    ctx.chat.close_event_source();
    tokio::time::timeout(Duration::from_secs(1), handle.finished())
        .await
        .unwrap();

    let messages = ctx.chat.messages();
    assert_eq!(messages.len(), 2);
    assert!(!messages[1].is_streaming);
    assert!(!messages[1].is_error);
    assert!(!ctx.chat.is_streaming());
    assert!(!ctx.chat.has_open_channel());
}

#[tokio::test]
async fn closing_with_nothing_open_is_harmless() {
    let server = MockServer::start().await;
    let ctx = context(&server);
    let mut events = ctx.events.subscribe();

    ctx.chat.close_event_source();
    ctx.chat.close_event_source();

    assert!(!ctx.chat.is_streaming());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn a_new_stream_supersedes_the_old_one() {
    let server = MockServer::start().await;
    let ctx = signed_in_with_chat(&server).await;
    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .respond_with(
            event_stream(&[json!({"content": "second", "done": true})])
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let first = ctx
        .chat
        .stream_chat_response("one", Some("llama3"), vec![])
        .await
        .unwrap();
    let second = ctx
        .chat
        .stream_chat_response("two", Some("llama3"), vec![])
        .await
        .unwrap();
    first.finished().await;
    second.finished().await;

    let messages = ctx.chat.messages();
    let streaming: Vec<_> = messages.iter().filter(|m| m.is_streaming).collect();
    assert!(streaming.is_empty());
    assert_eq!(messages.last().unwrap().content, "second");
    assert!(!ctx.chat.has_open_channel());
}
