//! Client-side decoding of the relay's event stream.
//!
//! [`EventDecoder`] is a push parser: feed it whatever byte chunks the
//! transport delivers and it hands back every event whose block has fully
//! arrived. [`consume_stream`] drives a decoder over a response body and
//! reports to a [`StreamObserver`].

use std::fmt::Display;

use futures::{Stream, StreamExt};
use tracing::{debug, trace};

use super::events::StreamEvent;

/// Incremental decoder for `data:`-framed event blocks.
///
/// Blocks are separated by a blank line. Lines starting with `:` are
/// comments; other fields are ignored. Multiple `data:` lines in one block
/// are joined with `\n`. A block whose payload is not a recognizable event
/// is skipped, and decoding continues with the next block.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a block terminator.
    scanned: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        // Carriage returns are never significant: JSON payloads escape them.
        self.buf
            .extend(bytes.iter().copied().filter(|&b| b != b'\r'));

        // A trailing `\n` from the last push may pair with the first new byte.
        let mut from = self.scanned.saturating_sub(1);
        let mut start = 0;
        let mut events = Vec::new();
        while let Some(offset) = self
            .buf
            .get(from..)
            .and_then(|rest| rest.windows(2).position(|w| w == b"\n\n"))
        {
            let end = from + offset;
            if let Some(event) = parse_block(self.buf.get(start..end).unwrap_or_default()) {
                events.push(event);
            }
            start = end + 2;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        events
    }

    /// Decode whatever is left once the body has ended.
    ///
    /// A final block without its blank-line terminator is still honored.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        if rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        parse_block(&rest)
    }

    /// Bytes received but not yet part of a complete block.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn parse_block(block: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(block);
    let mut data: Option<String> = None;

    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    let data = data?;
    let event = StreamEvent::from_data(&data);
    if event.is_none() {
        trace!("Skipping unparseable event block ({} bytes)", data.len());
    }
    event
}

/// Callbacks for one consumed stream.
///
/// `on_token` is called zero or more times in order, then exactly one of
/// `on_done` or `on_error`.
pub trait StreamObserver {
    fn on_token(&mut self, fragment: &str);
    fn on_done(&mut self);
    fn on_error(&mut self, message: &str);
}

impl<T: StreamObserver + ?Sized> StreamObserver for &mut T {
    fn on_token(&mut self, fragment: &str) {
        (**self).on_token(fragment);
    }

    fn on_done(&mut self) {
        (**self).on_done();
    }

    fn on_error(&mut self, message: &str) {
        (**self).on_error(message);
    }
}

/// How a consumed stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed(String),
}

impl StreamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed)
    }
}

/// Message reported when the body ends without a terminal event.
pub const PREMATURE_CLOSE: &str = "stream closed before completion";

/// Read `body` to its terminal event, reporting to `observer`.
///
/// Empty fragments are not forwarded. Reading stops at the first terminal
/// event; anything after it is discarded. A read error, or a body that
/// closes without a terminal event, is reported through `on_error`.
pub async fn consume_stream<S, B, E, O>(body: S, observer: &mut O) -> StreamOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    O: StreamObserver + ?Sized,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = EventDecoder::new();
    let mut tokens = 0usize;

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = format!("stream read failed: {e}");
                observer.on_error(&message);
                return StreamOutcome::Failed(message);
            }
        };
        for event in decoder.push(bytes.as_ref()) {
            if let Some(outcome) = dispatch(event, observer, &mut tokens) {
                return outcome;
            }
        }
    }

    if let Some(event) = decoder.finish()
        && let Some(outcome) = dispatch(event, observer, &mut tokens)
    {
        return outcome;
    }

    debug!("Event stream closed after {tokens} tokens without a terminal event");
    observer.on_error(PREMATURE_CLOSE);
    StreamOutcome::Failed(PREMATURE_CLOSE.to_string())
}

fn dispatch<O: StreamObserver + ?Sized>(
    event: StreamEvent,
    observer: &mut O,
    tokens: &mut usize,
) -> Option<StreamOutcome> {
    match event {
        StreamEvent::Token { content } => {
            if !content.is_empty() {
                *tokens += 1;
                observer.on_token(&content);
            }
            None
        }
        StreamEvent::Done => {
            debug!("Event stream completed with {tokens} tokens");
            observer.on_done();
            Some(StreamOutcome::Completed)
        }
        StreamEvent::Error { message } => {
            debug!("Event stream failed after {tokens} tokens: {message}");
            observer.on_error(&message);
            Some(StreamOutcome::Failed(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq)]
    struct Recorder {
        text: String,
        tokens: Vec<String>,
        done: usize,
        errors: Vec<String>,
    }

    impl StreamObserver for Recorder {
        fn on_token(&mut self, fragment: &str) {
            self.text.push_str(fragment);
            self.tokens.push(fragment.to_string());
        }

        fn on_done(&mut self) {
            self.done += 1;
        }

        fn on_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
    }

    fn wire(events: &[StreamEvent]) -> Vec<u8> {
        events
            .iter()
            .map(StreamEvent::encode)
            .collect::<String>()
            .into_bytes()
    }

    async fn consume_chunks(chunks: Vec<Vec<u8>>) -> (Recorder, StreamOutcome) {
        let body = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        let mut recorder = Recorder::default();
        let outcome = consume_stream(body, &mut recorder).await;
        (recorder, outcome)
    }

    #[test]
    fn decodes_complete_blocks_only() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"data: {\"content\":\"Hi\"}\n").is_empty());
        assert_eq!(decoder.push(b"\n"), vec![StreamEvent::token("Hi")]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn byte_at_a_time_scans_each_byte_once() {
        let payload = "x".repeat(64 * 1024);
        let mut bytes = wire(&[StreamEvent::token(payload.clone())]);
        bytes.extend_from_slice(b"data: [DONE]\n\n");

        let mut decoder = EventDecoder::new();
        let mut events = Vec::new();
        for byte in &bytes {
            events.extend(decoder.push(std::slice::from_ref(byte)));
            assert_eq!(decoder.scanned, decoder.pending());
        }
        assert_eq!(events, vec![StreamEvent::token(payload), StreamEvent::Done]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn many_blocks_in_one_push() {
        let tokens: Vec<StreamEvent> = (0..500)
            .map(|i| StreamEvent::token(format!("t{i}")))
            .collect();
        let mut bytes = wire(&tokens);
        bytes.extend_from_slice(b"data: {\"content\":\"par");

        let mut decoder = EventDecoder::new();
        assert_eq!(decoder.push(&bytes), tokens);
        assert_eq!(decoder.push(b"tial\"}\n\n"), vec![StreamEvent::token("partial")]);
    }

    #[test]
    fn tolerates_crlf_and_comments() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(b": ping\r\n\r\ndata: {\"content\":\"a\"}\r\n\r\ndata: [DONE]\r\n\r\n");
        assert_eq!(events, vec![StreamEvent::token("a"), StreamEvent::Done]);
    }

    #[test]
    fn joins_multi_line_data() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(b"event: token\ndata: {\"content\":\ndata: \"x\"}\n\n");
        assert_eq!(events, vec![StreamEvent::token("x")]);
    }

    #[test]
    fn skips_malformed_block_and_continues() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(b"data: {\"content\":\"tru\n\ndata: {\"content\":\"ok\"}\n\n");
        assert_eq!(events, vec![StreamEvent::token("ok")]);
    }

    #[test]
    fn finish_honors_unterminated_final_block() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), Some(StreamEvent::Done));
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn accumulates_tokens_then_done() {
        let bytes = wire(&[
            StreamEvent::token("Hi"),
            StreamEvent::token(" there"),
            StreamEvent::Done,
        ]);
        let (rec, outcome) = consume_chunks(vec![bytes]).await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(rec.text, "Hi there");
        assert_eq!(rec.done, 1);
        assert!(rec.errors.is_empty());
    }

    #[tokio::test]
    async fn result_is_independent_of_chunking() {
        let bytes = wire(&[
            StreamEvent::token("Héllo"),
            StreamEvent::token(", "),
            StreamEvent::token("```rust\nfn main() {}\n```"),
            StreamEvent::token("ünïcode ✓"),
            StreamEvent::Done,
        ]);
        let (whole, _) = consume_chunks(vec![bytes.clone()]).await;

        for size in [1, 2, 3, 5, 7, 13, 64] {
            let chunks = bytes.chunks(size).map(<[u8]>::to_vec).collect();
            let (rec, outcome) = consume_chunks(chunks).await;
            assert_eq!(outcome, StreamOutcome::Completed, "chunk size {size}");
            assert_eq!(rec, whole, "chunk size {size}");
        }
        assert_eq!(whole.text, "Héllo, ```rust\nfn main() {}\n```ünïcode ✓");
    }

    #[tokio::test]
    async fn error_after_one_token() {
        let bytes = wire(&[StreamEvent::token("partial"), StreamEvent::error("upstream died")]);
        let (rec, outcome) = consume_chunks(vec![bytes]).await;
        assert_eq!(outcome, StreamOutcome::Failed("upstream died".into()));
        assert_eq!(rec.tokens, vec!["partial"]);
        assert_eq!(rec.errors, vec!["upstream died"]);
        assert_eq!(rec.done, 0);
    }

    #[tokio::test]
    async fn premature_close_is_an_error() {
        let bytes = wire(&[StreamEvent::token("Hi")]);
        let (rec, outcome) = consume_chunks(vec![bytes]).await;
        assert_eq!(outcome, StreamOutcome::Failed(PREMATURE_CLOSE.into()));
        assert_eq!(rec.errors.len(), 1);
        assert_eq!(rec.done, 0);
    }

    #[tokio::test]
    async fn events_after_terminal_are_ignored() {
        let bytes = wire(&[
            StreamEvent::token("a"),
            StreamEvent::Done,
            StreamEvent::token("late"),
            StreamEvent::error("late"),
        ]);
        let (rec, outcome) = consume_chunks(vec![bytes]).await;
        assert!(outcome.is_completed());
        assert_eq!(rec.text, "a");
        assert_eq!(rec.done, 1);
        assert!(rec.errors.is_empty());
    }

    #[tokio::test]
    async fn empty_tokens_are_skipped() {
        let bytes = wire(&[StreamEvent::token(""), StreamEvent::token("x"), StreamEvent::Done]);
        let (rec, _) = consume_chunks(vec![bytes]).await;
        assert_eq!(rec.tokens, vec!["x"]);
    }

    #[tokio::test]
    async fn read_error_reports_once() {
        let body = futures::stream::iter(vec![
            Ok(wire(&[StreamEvent::token("a")])),
            Err(std::io::Error::other("reset")),
        ]);
        let mut rec = Recorder::default();
        let outcome = consume_stream(body, &mut rec).await;
        assert!(matches!(outcome, StreamOutcome::Failed(ref m) if m.contains("reset")));
        assert_eq!(rec.errors.len(), 1);
        assert_eq!(rec.text, "a");
    }
}
