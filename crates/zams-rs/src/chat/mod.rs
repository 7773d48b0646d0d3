//! Everything between the relay's response body and the screen.
//!
//! - [`events`]: the wire types ([`ChatRequest`], [`StreamEvent`]).
//! - [`consumer`]: incremental decoding and the [`StreamObserver`] contract.
//! - [`render`]: fence-aware segmentation of partial text.
//! - [`session`]: the [`ChatSession`] turn state machine.

pub mod consumer;
pub mod events;
pub mod render;
pub mod session;

pub use consumer::{EventDecoder, StreamObserver, StreamOutcome, consume_stream};
pub use events::{ChatRequest, DONE_MARKER, ErrorBody, StreamEvent};
pub use render::{PartialRenderState, Segment, render, should_autoscroll, to_terminal};
pub use session::{
    ChatSession, HistoryError, OutgoingTurn, Phase, STARTER_SUGGESTIONS, SessionError,
    SessionHistory, SessionObserver, TurnId,
};
