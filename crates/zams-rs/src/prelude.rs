//! Convenience re-exports for common `zams-rs` types.
//!
//! ```ignore
//! use zams_rs::prelude::*;
//! ```
//!
//! Covers what a chat client or relay needs day to day. Decoder internals
//! and the provider's retry policy stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{MAX_UPLOAD_BYTES, Message, MessageRole};

// ── Provider ────────────────────────────────────────────────────────
pub use crate::provider::{
    Completion, CompletionClient, CompletionProvider, ProviderConfig, ProviderError,
    ProviderErrorKind, TokenStream,
};

// ── Context assembly ────────────────────────────────────────────────
pub use crate::context::{
    Datasource, DatasourceContext, DatasourceQuery, DatasourceSource, InMemoryDatasources,
    ResponseMode, StoreError, build_request,
};

// ── Chat client ─────────────────────────────────────────────────────
pub use crate::chat::{
    ChatRequest, ChatSession, HistoryError, Phase, Segment, StreamEvent, StreamObserver,
    StreamOutcome, consume_stream, render, to_terminal,
};
pub use crate::client::{ClientError, RelayClient, UploadReceipt};
