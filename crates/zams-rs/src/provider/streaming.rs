//! Server-Sent Events decoding for the provider's streaming completions.
//!
//! The provider answers a `"stream": true` request with lines of the form
//! `data: {"choices":[{"delta":{"content":"..."}}]}` and a final
//! `data: [DONE]`. [`token_stream`] turns that body into a [`TokenStream`]
//! of content fragments.

use async_stream::try_stream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, trace};

use super::{ProviderError, TokenStream, error_message_from_value};

/// Raw SSE data chunk from the provider.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

/// One decoded provider line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ProviderLine {
    /// A content delta. `finished` is set when the chunk carries a
    /// `finish_reason`.
    Delta {
        content: Option<String>,
        finished: bool,
    },
    /// `data: [DONE]`.
    Done,
    /// Blank lines, comments, and non-`data` fields.
    Skip,
}

/// Byte buffer that yields complete `\n`-terminated lines.
///
/// Works on bytes so a UTF-8 sequence split across two network chunks is
/// only decoded once both halves have arrived.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete line, without its terminator or trailing `\r`.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Decode a single provider line.
pub(crate) fn parse_line(line: &str) -> Result<ProviderLine, ProviderError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(ProviderLine::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(ProviderLine::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::protocol(format!("malformed stream chunk: {e}")))?;

    if let Some(err) = chunk.error.as_ref() {
        let message = error_message_from_value(err)
            .unwrap_or_else(|| "completion provider reported an error".to_string());
        return Err(ProviderError::protocol(message));
    }

    let choice = chunk.choices.and_then(|c| c.into_iter().next());
    let Some(choice) = choice else {
        return Ok(ProviderLine::Delta {
            content: None,
            finished: false,
        });
    };
    if let Some(reason) = &choice.finish_reason {
        trace!("Stream finish_reason: {reason}");
    }
    Ok(ProviderLine::Delta {
        content: choice.delta.and_then(|d| d.content),
        finished: choice.finish_reason.is_some(),
    })
}

/// Turn a successful streaming response into a lazy fragment stream.
///
/// The body is read only as fragments are pulled. A body that ends before
/// `[DONE]` and without any `finish_reason` is reported as a transport
/// error.
pub(crate) fn token_stream(response: reqwest::Response) -> TokenStream {
    let stream = try_stream! {
        let mut chunks = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut done = false;
        let mut finished = false;
        let mut body_ended = false;
        let mut fragments = 0usize;

        loop {
            match chunks.next().await {
                Some(item) => {
                    let bytes = item.map_err(ProviderError::from_reqwest)?;
                    lines.push(&bytes);
                }
                None => {
                    // Flush a final line that arrived without its terminator.
                    lines.push(b"\n");
                    body_ended = true;
                }
            }

            while let Some(line) = lines.next_line() {
                match parse_line(&line)? {
                    ProviderLine::Done => {
                        done = true;
                        break;
                    }
                    ProviderLine::Delta { content, finished: f } => {
                        finished |= f;
                        if let Some(content) = content {
                            fragments += 1;
                            yield content;
                        }
                    }
                    ProviderLine::Skip => {}
                }
            }

            if done || body_ended {
                break;
            }
        }

        if !done && !finished {
            Err::<(), _>(ProviderError::transport(
                "completion stream ended before the provider signalled completion",
            ))?;
        }
        debug!("Provider stream completed with {fragments} fragments");
    };

    Box::pin(stream) as TokenStream
}
