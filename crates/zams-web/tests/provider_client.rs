//! Integration tests for the completion provider client.
//!
//! A small axum app stands in for an OpenAI-compatible `/chat/completions`
//! endpoint. The requested model name selects the upstream's behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{Value, json};
use zams_rs::Message;
use zams_rs::provider::{
    Completion, CompletionClient, CompletionProvider, ProviderConfig, ProviderError,
    ProviderErrorKind, RetryConfig,
};

const API_KEY: &str = "test-key";

#[derive(Clone, Default)]
struct Upstream {
    calls: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
}

fn chunk(content: &str) -> String {
    let data = json!({"choices": [{"delta": {"content": content}, "finish_reason": null}]});
    format!("data: {data}\n\n")
}

fn event_stream(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn completions(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let call = upstream.calls.fetch_add(1, Ordering::SeqCst);
    *upstream.last_body.lock().unwrap() = Some(body.clone());

    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if auth != Some(&format!("Bearer {API_KEY}")) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Invalid API Key"}})),
        )
            .into_response();
    }

    let model = body["model"].as_str().unwrap_or_default().to_string();
    let stream = body["stream"].as_bool().unwrap_or(false);

    match (model.as_str(), stream) {
        ("flaky", _) if call == 0 => {
            (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response()
        }
        ("rate-limited", _) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"message": "slow down"}})),
        )
            .into_response(),
        ("truncated", true) => event_stream(chunk("Hi")),
        ("broken", true) => event_stream(format!(
            "{}data: {{\"choices\":[{{\"delta\":\n\n",
            chunk("Hi")
        )),
        ("in-stream-error", true) => event_stream(format!(
            "{}data: {{\"error\":{{\"message\":\"model overloaded\"}}}}\n\n",
            chunk("Hi")
        )),
        ("finish-only", true) => event_stream(format!(
            "{}data: {}\n\n",
            chunk("Hi"),
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})
        )),
        (_, true) => event_stream(format!(
            ": keep-alive\n\n{}{}{}data: [DONE]\n\n",
            chunk("Hi"),
            chunk(""),
            chunk(" there")
        )),
        (_, false) => Json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}}]
        }))
        .into_response(),
    }
}

/// Start the mock upstream and return it with its `/v1` base URL.
async fn spawn_upstream() -> (Upstream, String) {
    let upstream = Upstream::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(upstream.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (upstream, format!("http://{addr}/v1"))
}

fn client(base_url: &str, model: &str) -> CompletionClient {
    CompletionClient::with_config(ProviderConfig {
        base_url: base_url.to_string(),
        model: model.to_string(),
        api_key: API_KEY.to_string(),
        ..Default::default()
    })
    .unwrap()
}

fn hello() -> Vec<Message> {
    vec![Message::system("Be concise."), Message::user("hello")]
}

async fn drain(client: &CompletionClient) -> (Vec<String>, Option<ProviderError>) {
    let mut tokens = client.complete_stream(&hello()).await.unwrap();
    let mut fragments = Vec::new();
    while let Some(item) = tokens.next().await {
        match item {
            Ok(fragment) => fragments.push(fragment),
            Err(e) => {
                assert!(tokens.next().await.is_none(), "items after an error");
                return (fragments, Some(e));
            }
        }
    }
    (fragments, None)
}

#[tokio::test]
async fn streams_fragments_in_order() {
    let (upstream, base) = spawn_upstream().await;
    let (fragments, err) = drain(&client(&base, "llama-test")).await;

    assert!(err.is_none(), "{err:?}");
    assert_eq!(fragments.concat(), "Hi there");
    assert_eq!(fragments.first().map(String::as_str), Some("Hi"));

    let body = upstream.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], "llama-test");
    assert_eq!(body["stream"], true);
    assert_eq!(
        body["messages"],
        json!([
            {"role": "system", "content": "Be concise."},
            {"role": "user", "content": "hello"}
        ])
    );
    assert!(body.get("temperature").is_none());
}

#[tokio::test]
async fn buffered_mode_returns_full_text() {
    let (upstream, base) = spawn_upstream().await;
    let client = client(&base, "llama-test");

    match client.complete(&hello(), false).await.unwrap() {
        Completion::Text(text) => assert_eq!(text, "Hi there"),
        other => panic!("expected text, got {other:?}"),
    }
    let body = upstream.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["stream"], false);
}

#[tokio::test]
async fn finish_reason_counts_as_completion() {
    let (_upstream, base) = spawn_upstream().await;
    let (fragments, err) = drain(&client(&base, "finish-only")).await;
    assert!(err.is_none(), "{err:?}");
    assert_eq!(fragments, vec!["Hi"]);
}

#[tokio::test]
async fn truncated_stream_is_an_error() {
    let (_upstream, base) = spawn_upstream().await;
    let (fragments, err) = drain(&client(&base, "truncated")).await;
    assert_eq!(fragments, vec!["Hi"]);
    assert_eq!(err.unwrap().kind, ProviderErrorKind::Transport);
}

#[tokio::test]
async fn malformed_chunk_is_an_error() {
    let (_upstream, base) = spawn_upstream().await;
    let (fragments, err) = drain(&client(&base, "broken")).await;
    assert_eq!(fragments, vec!["Hi"]);
    assert_eq!(err.unwrap().kind, ProviderErrorKind::Protocol);
}

#[tokio::test]
async fn in_stream_error_surfaces_message() {
    let (_upstream, base) = spawn_upstream().await;
    let (fragments, err) = drain(&client(&base, "in-stream-error")).await;
    assert_eq!(fragments, vec!["Hi"]);
    assert_eq!(err.unwrap().to_string(), "model overloaded");
}

#[tokio::test]
async fn bad_key_is_an_authentication_error() {
    let (_upstream, base) = spawn_upstream().await;
    let client = CompletionClient::with_config(ProviderConfig {
        base_url: base,
        api_key: "wrong".into(),
        ..Default::default()
    })
    .unwrap();

    let err = client.complete_stream(&hello()).await.err().unwrap();
    assert_eq!(err.kind, ProviderErrorKind::Authentication);
    assert_eq!(err.message, "Invalid API Key");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn rate_limit_is_transient() {
    let (upstream, base) = spawn_upstream().await;
    let err = client(&base, "rate-limited")
        .complete_text(&hello())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProviderErrorKind::RateLimited);
    assert_eq!(err.message, "slow down");
    assert!(err.is_transient());
    // No retries by default.
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn opening_request_is_retried_on_transient_failure() {
    let (upstream, base) = spawn_upstream().await;

    let no_retry = client(&base, "flaky");
    let err = no_retry.complete_stream(&hello()).await.err().unwrap();
    assert_eq!(err.kind, ProviderErrorKind::Unavailable);
    assert!(err.message.contains("503"));

    // Second upstream: first call fails, the retry succeeds.
    let (upstream2, base2) = spawn_upstream().await;
    let retrying = CompletionClient::with_config(ProviderConfig {
        base_url: base2,
        model: "flaky".into(),
        api_key: API_KEY.into(),
        retry: RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(10),
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap();
    let mut tokens = retrying.complete_stream(&hello()).await.unwrap();
    let mut text = String::new();
    while let Some(item) = tokens.next().await {
        text.push_str(&item.unwrap());
    }
    assert_eq!(text, "Hi there");
    assert_eq!(upstream2.calls.load(Ordering::SeqCst), 2);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}
