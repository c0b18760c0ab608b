//! End-to-end tests for dsk-gateway over a real listener.
//!
//! Tests cover:
//! 1. Non-streaming and streaming completions, including client disconnects
//! 2. Conversation continuity through the `user` field
//! 3. Cookie-expiry recovery, including refresh failure and timeout
//! 4. The `/refresh_cookies` endpoint

use std::sync::Arc;
use std::time::Duration;

use dsk_auth::{CredentialStore, RefreshError};
use dsk_gateway::testing::{MockBackend, MockRefresher};
use dsk_gateway::{GatewayConfig, GatewayServer, SessionRegistry};
use dsk_providers::BackendError;
use serde_json::{json, Value};
use tokio::net::TcpListener;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

struct TestServer {
    url: String,
    backend: Arc<MockBackend>,
    refresher: Arc<MockRefresher>,
    registry: Arc<SessionRegistry>,
    credentials: Arc<CredentialStore>,
}

async fn start(backend: MockBackend, refresher: MockRefresher) -> TestServer {
    let backend = Arc::new(backend);
    let refresher = Arc::new(refresher);
    let credentials = Arc::new(CredentialStore::new("tok"));

    let server = GatewayServer::new(
        GatewayConfig::default(),
        backend.clone(),
        credentials.clone(),
        refresher.clone(),
    );
    let registry = server.registry();
    let app = server.router();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        url: format!("http://127.0.0.1:{}", addr.port()),
        backend,
        refresher,
        registry,
        credentials,
    }
}

async fn chat(server: &TestServer, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", server.url))
        .json(&body)
        .send()
        .await
        .unwrap()
}

fn user_turn(content: &str, user: Option<&str>, stream: bool) -> Value {
    let mut body = json!({
        "model": "deepseek-chat",
        "messages": [{"role": "user", "content": content}],
        "stream": stream,
    });
    if let Some(user) = user {
        body["user"] = json!(user);
    }
    body
}

/// Split an SSE body into its `data:` payloads.
fn sse_data(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|event| {
            event
                .lines()
                .find_map(|line| line.strip_prefix("data:"))
                .map(|data| data.trim().to_string())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Completions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_non_streaming_completion() {
    let server = start(MockBackend::new(&["Hel", "lo"]), MockRefresher::succeeding()).await;

    let resp = chat(&server, user_turn("Hi", None, false)).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-conversation-id"));

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(body["model"], "deepseek-chat");
    assert_eq!(body["choices"][0]["index"], 0);
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");

    let request = &server.backend.requests()[0];
    assert_eq!(request.prompt, "Hi");
    assert!(request.parent_message_id.is_none());
    assert!(request.thinking_enabled);
    assert!(!request.search_enabled);
}

#[tokio::test]
async fn test_streaming_completion() {
    let server = start(MockBackend::new(&["Hel", "lo"]), MockRefresher::succeeding()).await;

    let resp = chat(&server, user_turn("Hi", Some("conv-s"), true)).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(resp.headers()["x-conversation-id"], "conv-s");

    let data = sse_data(&resp.text().await.unwrap());
    assert_eq!(data.len(), 4);
    assert_eq!(data[3], "[DONE]");

    let chunks: Vec<Value> = data[..3]
        .iter()
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert_eq!(chunks[0]["object"], "chat.completion.chunk");
    assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "Hel");
    assert!(chunks[0]["choices"][0]["finish_reason"].is_null());
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "lo");
    assert_eq!(chunks[2]["choices"][0]["delta"], json!({}));
    assert_eq!(chunks[2]["choices"][0]["finish_reason"], "stop");
    assert!(chunks.iter().all(|c| c["id"] == chunks[0]["id"]));

    let state = server.registry.snapshot("conv-s").await.unwrap();
    assert_eq!(state.last_message_id.as_deref(), Some("msg-1"));
}

#[tokio::test]
async fn test_mid_stream_error_is_sent_in_band() {
    let server = start(
        MockBackend::new(&["partial"]).with_mid_stream_error("connection reset"),
        MockRefresher::succeeding(),
    )
    .await;

    let resp = chat(&server, user_turn("Hi", Some("conv-e"), true)).await;
    assert_eq!(resp.status(), 200);

    let data = sse_data(&resp.text().await.unwrap());
    assert_eq!(data.len(), 3);
    let error: Value = serde_json::from_str(&data[1]).unwrap();
    assert_eq!(error["error"]["type"], "server_error");
    assert!(error["error"]["message"]
        .as_str()
        .unwrap()
        .contains("connection reset"));
    assert_eq!(data[2], "[DONE]");

    // The turn never terminated, so nothing was committed.
    let state = server.registry.snapshot("conv-e").await.unwrap();
    assert!(state.last_message_id.is_none());
}

#[tokio::test]
async fn test_client_disconnect_mid_stream_commits_nothing() {
    let pieces = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
    let server = start(
        MockBackend::new(&pieces).with_fragment_delay(Duration::from_millis(100)),
        MockRefresher::succeeding(),
    )
    .await;

    let mut resp = chat(&server, user_turn("Hi", Some("conv-d"), true)).await;
    assert_eq!(resp.status(), 200);
    let first = resp.chunk().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("chat.completion.chunk"));
    drop(resp);

    // The snapshot waits on the lease, so it returns once the server drops the stream.
    let state = tokio::time::timeout(
        Duration::from_secs(5),
        server.registry.snapshot("conv-d"),
    )
    .await
    .expect("lease was not released after disconnect")
    .unwrap();
    assert_eq!(state.session_id, "session-1");
    assert!(state.last_message_id.is_none());

    let resp = tokio::time::timeout(
        Duration::from_secs(5),
        chat(&server, user_turn("Again", Some("conv-d"), false)),
    )
    .await
    .expect("follow-up turn was blocked");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], pieces.concat());

    let requests = server.backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].session_id, "session-1");
    assert!(requests[1].parent_message_id.is_none());
    assert_eq!(server.backend.create_count(), 1);
}

#[tokio::test]
async fn test_no_user_message_is_400() {
    let server = start(MockBackend::new(&["x"]), MockRefresher::succeeding()).await;

    let resp = chat(
        &server,
        json!({"messages": [{"role": "system", "content": "only system"}]}),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(server.backend.create_count(), 0);
}

// ---------------------------------------------------------------------------
// Conversation continuity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_same_user_reuses_session_and_threads_parent() {
    let server = start(MockBackend::new(&["ok"]), MockRefresher::succeeding()).await;

    for _ in 0..3 {
        let resp = chat(&server, user_turn("again", Some("conv-1"), false)).await;
        assert_eq!(resp.status(), 200);
    }

    assert_eq!(server.backend.create_count(), 1);
    let requests = server.backend.requests();
    assert!(requests.iter().all(|r| r.session_id == "session-1"));
    assert_eq!(requests[0].parent_message_id, None);
    assert_eq!(requests[1].parent_message_id.as_deref(), Some("msg-1"));
    assert_eq!(requests[2].parent_message_id.as_deref(), Some("msg-2"));
}

#[tokio::test]
async fn test_distinct_and_missing_users_get_distinct_sessions() {
    let server = start(MockBackend::new(&["ok"]), MockRefresher::succeeding()).await;

    chat(&server, user_turn("a", Some("conv-a"), false)).await;
    chat(&server, user_turn("b", Some("conv-b"), false)).await;
    chat(&server, user_turn("c", None, false)).await;
    chat(&server, user_turn("d", None, false)).await;

    assert_eq!(server.backend.create_count(), 4);
    assert_eq!(server.registry.len(), 4);

    let a = server.registry.snapshot("conv-a").await.unwrap();
    let b = server.registry.snapshot("conv-b").await.unwrap();
    assert_ne!(a.session_id, b.session_id);
}

#[tokio::test]
async fn test_concurrent_first_requests_create_one_session() {
    let server = start(
        MockBackend::new(&["ok"]).with_create_delay(Duration::from_millis(50)),
        MockRefresher::succeeding(),
    )
    .await;
    let server = Arc::new(server);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let server = server.clone();
        handles.push(tokio::spawn(async move {
            chat(&server, user_turn("hi", Some("conv-race"), false))
                .await
                .status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 200);
    }

    assert_eq!(server.backend.create_count(), 1);
    assert_eq!(server.backend.complete_count(), 5);
}

// ---------------------------------------------------------------------------
// Auth recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_expired_cookie_is_refreshed_and_retried() {
    let server = start(
        MockBackend::new(&["recovered"])
            .with_complete_error(BackendError::AuthExpired("status 401".into())),
        MockRefresher::succeeding(),
    )
    .await;

    let resp = chat(&server, user_turn("Hi", Some("conv-r"), false)).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "recovered");

    assert_eq!(server.refresher.calls(), 1);
    assert_eq!(server.backend.complete_count(), 2);
    assert_eq!(server.credentials.generation().await, 1);
}

#[tokio::test]
async fn test_double_expiry_is_authentication_error() {
    let server = start(
        MockBackend::new(&["never"])
            .with_create_error(BackendError::AuthExpired("status 401".into()))
            .with_create_error(BackendError::AuthExpired("status 401".into())),
        MockRefresher::succeeding(),
    )
    .await;

    let resp = chat(&server, user_turn("Hi", Some("conv-x"), false)).await;
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");

    assert_eq!(server.backend.create_count(), 2);
    assert_eq!(server.refresher.calls(), 1);
    assert!(server.registry.snapshot("conv-x").await.is_none());
}

#[tokio::test]
async fn test_expiry_on_create_and_complete_refreshes_once() {
    let server = start(
        MockBackend::new(&["never"])
            .with_create_error(BackendError::AuthExpired("status 401".into()))
            .with_complete_error(BackendError::AuthExpired("status 401".into())),
        MockRefresher::succeeding(),
    )
    .await;

    let resp = chat(&server, user_turn("Hi", Some("conv-both"), false)).await;
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");

    assert_eq!(server.refresher.calls(), 1);
    assert_eq!(server.backend.create_count(), 2);
    assert_eq!(server.backend.complete_count(), 1);

    let state = server.registry.snapshot("conv-both").await.unwrap();
    assert_eq!(state.session_id, "session-2");
    assert!(state.last_message_id.is_none());
}

#[tokio::test]
async fn test_refresh_timeout_is_504_and_registry_unchanged() {
    let server = start(
        MockBackend::new(&["never"])
            .with_create_error(BackendError::AuthExpired("challenge".into())),
        MockRefresher::failing(RefreshError::Timeout { secs: 180 }),
    )
    .await;

    let resp = chat(&server, user_turn("Hi", Some("conv-t"), false)).await;
    assert_eq!(resp.status(), 504);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "timeout_error");
    assert!(body["error"]["param"].is_null());
    assert!(body["error"]["code"].is_null());

    assert_eq!(server.backend.create_count(), 1);
    assert!(server.registry.snapshot("conv-t").await.is_none());
    assert!(server.registry.is_empty());
}

#[tokio::test]
async fn test_backend_unavailable_is_not_retried() {
    let server = start(
        MockBackend::new(&["never"])
            .with_complete_error(BackendError::Unavailable("status 502".into())),
        MockRefresher::succeeding(),
    )
    .await;

    let resp = chat(&server, user_turn("Hi", Some("conv-u"), true)).await;
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "server_error");

    assert_eq!(server.backend.complete_count(), 1);
    assert_eq!(server.refresher.calls(), 0);

    // The session survives; only the turn failed.
    let state = server.registry.snapshot("conv-u").await.unwrap();
    assert!(state.last_message_id.is_none());
}

// ---------------------------------------------------------------------------
// /refresh_cookies
// ---------------------------------------------------------------------------

async fn post_refresh(server: &TestServer) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/refresh_cookies", server.url))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_refresh_endpoint_success() {
    let server = start(MockBackend::new(&["x"]), MockRefresher::succeeding()).await;

    let resp = post_refresh(&server).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(server.credentials.has_cookies().await);
}

#[tokio::test]
async fn test_refresh_endpoint_failure_reports_output() {
    let server = start(
        MockBackend::new(&["x"]),
        MockRefresher::failing(RefreshError::ProcessFailed {
            status: "exit status: 1".into(),
            stdout: "solving".into(),
            stderr: "browser crashed".into(),
        }),
    )
    .await;

    let resp = post_refresh(&server).await;
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["stdout"], "solving");
    assert_eq!(body["stderr"], "browser crashed");
}

#[tokio::test]
async fn test_refresh_endpoint_timeout() {
    let server = start(
        MockBackend::new(&["x"]),
        MockRefresher::failing(RefreshError::Timeout { secs: 180 }),
    )
    .await;

    let resp = post_refresh(&server).await;
    assert_eq!(resp.status(), 504);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body.get("stdout").is_none());
}
