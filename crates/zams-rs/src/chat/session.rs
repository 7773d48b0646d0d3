//! Conversation state for one chat client.
//!
//! [`ChatSession`] is the only thing that mutates the history. A turn moves
//! through [`Phase::Sending`] and [`Phase::Streaming`] and ends in
//! [`Phase::Committed`] or [`Phase::Failed`]; every transition is an explicit
//! method call. Events are tagged with the [`TurnId`] returned by
//! [`ChatSession::submit`], and events for a superseded turn are dropped.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::consumer::StreamObserver;
use super::events::{ChatRequest, StreamEvent};
use super::render::PartialRenderState;
use crate::context::ResponseMode;
use crate::{Message, MessageRole};

/// Longest accepted user input, in characters, after trimming.
pub const MAX_INPUT_CHARS: usize = 1000;

/// Questions offered before the first message of a conversation.
pub const STARTER_SUGGESTIONS: [&str; 5] = [
    "How many datasources are available?",
    "Show me all PDF files in the system",
    "Who created the most datasources?",
    "What's the latest datasource added?",
    "How many files are connected vs uploaded?",
];

/// Identifies one submitted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// Request sent, no fragment received yet.
    Sending,
    /// At least one fragment received.
    Streaming,
    /// The last turn ended with `Done` and its reply is in the history.
    Committed,
    /// The last turn ended with an error.
    Failed,
}

/// A turn ready to be sent to the relay.
#[derive(Debug, Clone)]
pub struct OutgoingTurn {
    pub id: TurnId,
    pub request: ChatRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("message is empty")]
    EmptyInput,
    #[error("message is {len} characters; the limit is {max}")]
    InputTooLong { len: usize, max: usize },
}

/// The part of a session kept between runs: committed messages, which of
/// them were cut short, and the response mode.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionHistory {
    pub messages: Vec<Message>,
    /// Indices into `messages` of assistant replies cut short by an error.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incomplete: Vec<usize>,
    #[serde(default)]
    pub mode: ResponseMode,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("failed to access history file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid history file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct ChatSession {
    messages: Vec<Message>,
    /// Indices of assistant messages cut short by a stream error.
    incomplete: BTreeSet<usize>,
    phase: Phase,
    current: Option<TurnId>,
    next_turn: u64,
    partial: String,
    mode: ResponseMode,
    exclude_datasources: bool,
    last_error: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a session from saved history.
    ///
    /// System messages are dropped, as are incomplete markers that do not
    /// point at an assistant message.
    pub fn from_history(history: SessionHistory) -> Self {
        let SessionHistory {
            messages,
            incomplete,
            mode,
        } = history;
        let mut kept = Vec::with_capacity(messages.len());
        let mut markers = BTreeSet::new();
        for (index, message) in messages.into_iter().enumerate() {
            if message.role == MessageRole::System {
                continue;
            }
            if message.role == MessageRole::Assistant && incomplete.contains(&index) {
                markers.insert(kept.len());
            }
            kept.push(message);
        }
        Self {
            messages: kept,
            incomplete: markers,
            mode,
            ..Self::default()
        }
    }

    /// Committed history. The in-flight turn's partial text is not included.
    pub fn history(&self) -> SessionHistory {
        SessionHistory {
            messages: self.messages.clone(),
            incomplete: self.incomplete.iter().copied().collect(),
            mode: self.mode,
        }
    }

    /// Load a session from a JSON history file, or start an empty one if
    /// the file does not exist.
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref();
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No history at {}; starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let history: SessionHistory = serde_json::from_str(&data)?;
        debug!(
            "Loaded {} messages from {}",
            history.messages.len(),
            path.display()
        );
        Ok(Self::from_history(history))
    }

    /// Write the committed history to `path` as JSON.
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<(), HistoryError> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(&self.history())?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        debug!("Saved {} messages to {}", self.messages.len(), path.display());
        Ok(())
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn set_mode(&mut self, mode: ResponseMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    pub fn set_include_datasources(&mut self, include: bool) {
        self.exclude_datasources = !include;
    }

    /// Append `input` as a user message and start a new turn.
    ///
    /// A turn still in flight is superseded: its partial reply is discarded
    /// and its remaining events will be ignored.
    pub fn submit(&mut self, input: &str) -> Result<OutgoingTurn, SessionError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        let len = input.chars().count();
        if len > MAX_INPUT_CHARS {
            return Err(SessionError::InputTooLong {
                len,
                max: MAX_INPUT_CHARS,
            });
        }

        if let Some(previous) = self.current.take() {
            debug!("Turn {previous:?} superseded before completion");
            self.partial.clear();
        }

        self.messages.push(Message::user(input));
        let id = TurnId(self.next_turn);
        self.next_turn += 1;
        self.current = Some(id);
        self.phase = Phase::Sending;
        self.last_error = None;

        let request = ChatRequest {
            messages: self.messages.clone(),
            response_type: Some(self.mode),
            include_datasources: !self.exclude_datasources,
            include_analytics: true,
        };
        Ok(OutgoingTurn { id, request })
    }

    /// Feed one event for turn `id`. Returns `false` if it was ignored.
    pub fn apply(&mut self, id: TurnId, event: &StreamEvent) -> bool {
        if self.current != Some(id) {
            trace!("Ignoring event for stale turn {id:?}");
            return false;
        }

        match event {
            StreamEvent::Token { content } => {
                self.partial.push_str(content);
                self.phase = Phase::Streaming;
            }
            StreamEvent::Done => {
                let text = std::mem::take(&mut self.partial);
                if !text.is_empty() {
                    self.messages.push(Message::assistant(text));
                }
                self.current = None;
                self.phase = Phase::Committed;
            }
            StreamEvent::Error { message } => {
                let text = std::mem::take(&mut self.partial);
                if !text.is_empty() {
                    self.incomplete.insert(self.messages.len());
                    self.messages.push(Message::assistant(text));
                }
                debug!("Turn {id:?} failed: {message}");
                self.last_error = Some(message.clone());
                self.current = None;
                self.phase = Phase::Failed;
            }
        }
        true
    }

    /// Abandon the in-flight turn, if any, and return to [`Phase::Idle`].
    pub fn cancel(&mut self) -> bool {
        let Some(id) = self.current.take() else {
            return false;
        };
        debug!("Turn {id:?} cancelled");
        self.partial.clear();
        self.phase = Phase::Idle;
        true
    }

    /// Forget the whole conversation.
    pub fn clear(&mut self) {
        self.cancel();
        self.messages.clear();
        self.incomplete.clear();
        self.last_error = None;
        self.phase = Phase::Idle;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether the message at `index` is a reply cut short by an error.
    pub fn is_incomplete(&self, index: usize) -> bool {
        self.incomplete.contains(&index)
    }

    /// Text received so far for the in-flight turn.
    pub fn partial(&self) -> &str {
        &self.partial
    }

    pub fn render_partial(&self) -> PartialRenderState {
        PartialRenderState::from_text(&self.partial)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a turn is in flight. Input should be disabled while true.
    pub fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Sending | Phase::Streaming)
    }

    /// Starter questions, offered only while the conversation is empty and
    /// idle.
    pub fn suggestions(&self) -> &'static [&'static str] {
        if self.messages.is_empty() && !self.is_busy() {
            &STARTER_SUGGESTIONS
        } else {
            &[]
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A [`StreamObserver`] that feeds turn `id` into this session.
    pub fn observer(&mut self, id: TurnId) -> SessionObserver<'_> {
        SessionObserver { session: self, id }
    }
}

/// Routes consumer callbacks for one turn into a [`ChatSession`].
pub struct SessionObserver<'a> {
    session: &'a mut ChatSession,
    id: TurnId,
}

impl SessionObserver<'_> {
    pub fn session(&self) -> &ChatSession {
        self.session
    }
}

impl StreamObserver for SessionObserver<'_> {
    fn on_token(&mut self, fragment: &str) {
        self.session.apply(self.id, &StreamEvent::token(fragment));
    }

    fn on_done(&mut self) {
        self.session.apply(self.id, &StreamEvent::Done);
    }

    fn on_error(&mut self, message: &str) {
        self.session.apply(self.id, &StreamEvent::error(message));
    }
}
