//! Wire types shared by the relay and its clients.
//!
//! The relay answers `POST /api/chat` with blocks of the form
//!
//! ```text
//! data: {"content":"<fragment>"}
//!
//! data: [DONE]
//!
//! ```
//!
//! or, on failure, a final `data: {"error":"<message>"}` block.

use serde::{Deserialize, Serialize};

use crate::Message;
use crate::context::ResponseMode;

/// Literal payload of the successful terminal block.
pub const DONE_MARKER: &str = "[DONE]";

/// Request body for `POST /api/chat`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Absent means [`ResponseMode::Concise`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseMode>,
    /// Ground the answer in the datasource table. Default: `true`.
    #[serde(default = "default_true")]
    pub include_datasources: bool,
    /// Precompute counts and newest/oldest over the snapshot instead of
    /// sending the raw records alone. Default: `true`.
    #[serde(default = "default_true")]
    pub include_analytics: bool,
}

fn default_true() -> bool {
    true
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            response_type: None,
            include_datasources: true,
            include_analytics: true,
        }
    }

    pub fn mode(&self) -> ResponseMode {
        self.response_type.unwrap_or_default()
    }
}

/// A structured `{error}` body, used by every non-streamed failure response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

/// One unit of the relay's event stream.
///
/// A successful exchange is zero or more `Token`s followed by exactly one
/// `Done`. A failed one ends with exactly one `Error` and nothing after it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Token { content: String },
    Done,
    Error { message: String },
}

#[derive(Serialize)]
struct TokenPayload<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
}

#[derive(Deserialize)]
struct IncomingPayload {
    content: Option<String>,
    error: Option<String>,
}

impl StreamEvent {
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token { .. })
    }

    /// The text that follows `data: ` on the wire.
    pub fn data(&self) -> String {
        let json = match self {
            Self::Token { content } => serde_json::to_string(&TokenPayload {
                content: content.as_str(),
            }),
            Self::Error { message } => serde_json::to_string(&ErrorPayload {
                error: message.as_str(),
            }),
            Self::Done => return DONE_MARKER.to_string(),
        };
        // A struct of one string field always serializes.
        json.unwrap_or_default()
    }

    /// The full block, including its blank-line terminator.
    pub fn encode(&self) -> String {
        format!("data: {}\n\n", self.data())
    }

    /// Interpret a block's data payload.
    ///
    /// Returns `None` for anything that is not the done marker or a JSON
    /// object with a string `content` or `error` field. `error` wins when
    /// both are present.
    pub fn from_data(data: &str) -> Option<Self> {
        if data.trim() == DONE_MARKER {
            return Some(Self::Done);
        }
        let payload: IncomingPayload = serde_json::from_str(data).ok()?;
        match (payload.error, payload.content) {
            (Some(message), _) => Some(Self::Error { message }),
            (None, Some(content)) => Some(Self::Token { content }),
            (None, None) => None,
        }
    }
}
