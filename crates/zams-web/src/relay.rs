//! The streaming chat relay: `POST /api/chat`.
//!
//! A request moves through four stages:
//!
//! 1. **Received**: the body is parsed and validated. Failures are answered
//!    with `400 {error}` and no stream is opened.
//! 2. **Assembling**: the datasource snapshot is taken (when requested) and
//!    the system prompt is built. A snapshot failure is answered with
//!    `500 {error}`, still before any stream bytes.
//! 3. **Streaming**: the provider call is opened inside the response body,
//!    and each fragment becomes one `data: {"content"}` block.
//! 4. **Completed** or **Failed**: exactly one `data: [DONE]` or
//!    `data: {"error"}` block, then the body ends.
//!
//! The body is pull-driven. The next provider fragment is only requested
//! once the transport has taken the previous event, so a slow reader slows
//! the provider read instead of growing a buffer.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

use async_stream::stream;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use tracing::{debug, error, info, trace, warn};
use zams_rs::Message;
use zams_rs::chat::{ChatRequest, StreamEvent};
use zams_rs::context::{DatasourceContext, build_request, validate_history};
use zams_rs::provider::CompletionProvider;

use crate::api::{AppState, json_error};

/// Generate a unique id for one relayed request.
///
/// Format: `rq-{timestamp_hex}-{counter}`.
pub fn generate_request_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("rq-{ts:x}-{count:04x}")
}

/// Parse and validate a raw request body.
///
/// `messages` is checked before the rest of the body so that a missing or
/// non-array list gets the same message as an empty one.
pub fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, String> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| format!("invalid JSON body: {e}"))?;
    if !value.get("messages").is_some_and(|m| m.is_array()) {
        return Err("messages must be a non-empty array".to_string());
    }
    let request: ChatRequest =
        serde_json::from_value(value).map_err(|e| format!("invalid request body: {e}"))?;
    validate_history(&request.messages)?;
    Ok(request)
}

/// POST /api/chat: Relay one completion as an event stream.
pub async fn post_chat(State(app): State<AppState>, body: Bytes) -> Response {
    let request_id = generate_request_id();

    let request = match parse_chat_request(&body) {
        Ok(r) => r,
        Err(message) => {
            debug!("[{request_id}] Rejected chat request: {message}");
            return json_error(StatusCode::BAD_REQUEST, message);
        }
    };

    let context = if request.include_datasources {
        match app.datasources.snapshot().await {
            Ok(records) if request.include_analytics => Some(DatasourceContext::analyze(records)),
            Ok(records) => Some(DatasourceContext::raw(records)),
            Err(e) => {
                error!("[{request_id}] Datasource snapshot failed: {e}");
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("failed to load datasources: {e}"),
                );
            }
        }
    } else {
        None
    };

    let mode = request.mode();
    let messages = build_request(&request.messages, mode, context.as_ref());
    info!(
        "[{request_id}] Chat request: {} messages, mode={mode:?}, grounded={}",
        request.messages.len(),
        context.is_some()
    );

    let events = relay_events(app.provider.clone(), messages, request_id)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.data())));

    (
        [(header::CONNECTION, "keep-alive")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

/// The relay's event sequence for one assembled request.
///
/// Zero or more `Token`s, then exactly one `Done` or `Error`. Empty
/// fragments are dropped. Nothing is read from the provider until the
/// first event is polled.
pub fn relay_events(
    provider: Arc<dyn CompletionProvider>,
    messages: Vec<Message>,
    request_id: String,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    stream! {
        let start = Instant::now();
        let mut tokens = match provider.complete_stream(&messages).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("[{request_id}] Completion request failed: {e}");
                yield StreamEvent::error(e.to_string());
                return;
            }
        };

        let mut fragments = 0usize;
        while let Some(item) = tokens.next().await {
            match item {
                Ok(fragment) if fragment.is_empty() => {}
                Ok(fragment) => {
                    fragments += 1;
                    trace!("[{request_id}] Fragment {fragments}: {} bytes", fragment.len());
                    yield StreamEvent::token(fragment);
                }
                Err(e) => {
                    warn!(
                        "[{request_id}] Completion stream failed after {fragments} fragments: {e}"
                    );
                    yield StreamEvent::error(e.to_string());
                    return;
                }
            }
        }

        info!(
            "[{request_id}] Chat completed: {fragments} fragments in {:.1}s",
            start.elapsed().as_secs_f64()
        );
        yield StreamEvent::Done;
    }
}
