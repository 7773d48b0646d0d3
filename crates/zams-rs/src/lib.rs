//! Datasource-grounded chat streaming for the zams dashboard.
//!
//! `zams-rs` holds everything on both sides of the chat streaming pipeline
//! except the HTTP server itself (that lives in `zams-web`):
//!
//! ```text
//! history ─▶ context::build_request ─▶ CompletionProvider::complete_stream
//!                                                 │ fragments
//!                                                 ▼
//!                                   relay (zams-web) ── data: {...}\n\n ──▶
//!   chat::consume_stream ─▶ ChatSession (accumulate) ─▶ chat::render
//! ```
//!
//! - [`provider`]: the [`CompletionProvider`](provider::CompletionProvider)
//!   seam and an HTTP client for OpenAI-compatible completion APIs (Groq by
//!   default). Streaming responses are exposed as a lazy
//!   [`TokenStream`](provider::TokenStream).
//! - [`context`]: system prompt assembly and the datasource snapshot that
//!   grounds the assistant's answers.
//! - [`chat`]: the wire events exchanged between relay and client, the
//!   incremental event decoder, the fence-aware renderer, and the
//!   [`ChatSession`](chat::ChatSession) state machine.
//! - [`client`]: a reqwest client for the relay (`/api/chat`, `/api/upload`).
//!
//! # Getting started
//!
//! ```ignore
//! use zams_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let relay = RelayClient::new("http://127.0.0.1:3001").map_err(|e| e.to_string())?;
//!     let mut session = ChatSession::new();
//!
//!     let turn = session.submit("How many CSV datasources are there?")
//!         .map_err(|e| e.to_string())?;
//!     let mut observer = session.observer(turn.id);
//!     relay.send(&turn.request, &mut observer).await.map_err(|e| e.to_string())?;
//!
//!     for message in session.messages() {
//!         println!("{}: {}", message.role, message.content);
//!     }
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod client;
pub mod context;
pub mod prelude;
pub mod provider;

use serde::{Deserialize, Serialize};

// ── Constants ──────────────────────────────────────────────────────

/// Base URL of the default OpenAI-compatible completion API.
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default model for chat completions.
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Environment variable holding the completion API key.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Upload ceiling in bytes (5 MiB). A file of exactly this size is accepted.
pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in the conversation.
///
/// `System` messages are only ever synthesized by
/// [`context::build_request`]; they never appear in user-visible history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}
