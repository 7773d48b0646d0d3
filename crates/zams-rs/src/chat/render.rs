//! Fence-aware rendering of (possibly partial) assistant text.
//!
//! [`render`] is a pure function of the accumulated text and is re-run on
//! every fragment. An unterminated fence renders as an open code block
//! rather than literal backticks, so a streaming code sample never flickers
//! between the two forms.

const FENCE: &str = "```";

/// Pixel distance from the bottom within which the view keeps following.
pub const AUTOSCROLL_THRESHOLD_PX: f64 = 100.0;

/// One displayable piece of assistant text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Code {
        /// Tag after the opening delimiter, if any.
        language: Option<String>,
        body: String,
        /// `false` while the closing delimiter has not arrived.
        complete: bool,
    },
}

/// Split `text` into plain-text and fenced-code segments.
///
/// Never fails: text without delimiters is a single `Text` segment, and an
/// odd delimiter count leaves the last fence open.
pub fn render(text: &str) -> Vec<Segment> {
    let parts: Vec<&str> = text.split(FENCE).collect();
    let last = parts.len() - 1;
    let mut segments = Vec::with_capacity(parts.len());

    for (i, part) in parts.iter().enumerate() {
        if i % 2 == 0 {
            if !part.is_empty() {
                segments.push(Segment::Text((*part).to_string()));
            }
        } else {
            segments.push(code_segment(part, i < last));
        }
    }
    segments
}

fn code_segment(inner: &str, complete: bool) -> Segment {
    let (language, body) = match inner.split_once('\n') {
        Some((tag, body)) => (tag, body),
        // ```inline``` is all body; an open fence is still typing its tag.
        None if complete => ("", inner),
        None => (inner, ""),
    };
    let language = language.trim();
    let body = if complete {
        body.strip_suffix('\n').unwrap_or(body)
    } else {
        body
    };
    Segment::Code {
        language: (!language.is_empty()).then(|| language.to_string()),
        body: body.to_string(),
        complete,
    }
}

/// The rendering projection of an in-progress reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialRenderState {
    pub text: String,
    /// Whether the text ends inside an unterminated fence.
    pub in_fence: bool,
    /// Language tag of that fence, if known yet.
    pub fence_language: Option<String>,
}

impl PartialRenderState {
    pub fn from_text(text: &str) -> Self {
        let open = render(text).into_iter().last().and_then(|s| match s {
            Segment::Code {
                language,
                complete: false,
                ..
            } => Some(language),
            _ => None,
        });
        Self {
            text: text.to_string(),
            in_fence: open.is_some(),
            fence_language: open.flatten(),
        }
    }

    pub fn segments(&self) -> Vec<Segment> {
        render(&self.text)
    }
}

/// Format segments for a terminal.
///
/// Code blocks are indented and framed with their language; an open block
/// is left without its closing rule.
pub fn to_terminal(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Code {
                language,
                body,
                complete,
            } => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&format!("┌─ {}\n", language.as_deref().unwrap_or("code")));
                for line in body.lines() {
                    out.push_str("│ ");
                    out.push_str(line);
                    out.push('\n');
                }
                if *complete {
                    out.push_str("└─\n");
                }
            }
        }
    }
    out
}

/// Whether a view should stay pinned to the newest content.
///
/// Follows when the viewport is within [`AUTOSCROLL_THRESHOLD_PX`] of the
/// bottom, or when the conversation has at most one message. Otherwise the
/// user has scrolled up to read and is left alone.
pub fn should_autoscroll(
    scroll_top: f64,
    viewport_height: f64,
    content_height: f64,
    message_count: usize,
) -> bool {
    if message_count <= 1 {
        return true;
    }
    content_height - (scroll_top + viewport_height) <= AUTOSCROLL_THRESHOLD_PX
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(language: Option<&str>, body: &str, complete: bool) -> Segment {
        Segment::Code {
            language: language.map(str::to_string),
            body: body.to_string(),
            complete,
        }
    }

    fn text(s: &str) -> Segment {
        Segment::Text(s.to_string())
    }

    #[test]
    fn plain_text_is_one_segment() {
        assert_eq!(render("hello"), vec![text("hello")]);
        assert!(render("").is_empty());
    }

    #[test]
    fn closed_fence_with_surrounding_text() {
        let segments = render("Try:\n```python\nprint(1)\n```\nDone.");
        assert_eq!(
            segments,
            vec![
                text("Try:\n"),
                code(Some("python"), "print(1)", true),
                text("\nDone."),
            ]
        );
    }

    #[test]
    fn even_delimiters_leave_no_backticks() {
        let input = "a ```js\nx()\n``` b ```\nplain\n``` c";
        let segments = render(input);
        let code_blocks = segments
            .iter()
            .filter(|s| matches!(s, Segment::Code { .. }))
            .count();
        assert_eq!(code_blocks, 2);
        for segment in &segments {
            match segment {
                Segment::Text(t) => assert!(!t.contains(FENCE)),
                Segment::Code { body, complete, .. } => {
                    assert!(!body.contains(FENCE));
                    assert!(complete);
                }
            }
        }
        assert_eq!(segments[3], code(None, "plain", true));
    }

    #[test]
    fn unterminated_fence_renders_as_code() {
        let segments = render("Here:\n```rust\nfn main() {");
        assert_eq!(
            segments,
            vec![text("Here:\n"), code(Some("rust"), "fn main() {", false)]
        );
    }

    #[test]
    fn fence_still_typing_its_tag() {
        assert_eq!(render("x ```py"), vec![text("x "), code(Some("py"), "", false)]);
        assert_eq!(render("```"), vec![code(None, "", false)]);
    }

    #[test]
    fn inline_closed_fence_is_body() {
        assert_eq!(render("```ls -la```"), vec![code(None, "ls -la", true)]);
    }

    #[test]
    fn partial_state_tracks_open_fence() {
        let state = PartialRenderState::from_text("See ```json\n{\"a\":");
        assert!(state.in_fence);
        assert_eq!(state.fence_language.as_deref(), Some("json"));

        let closed = PartialRenderState::from_text("See ```json\n{}\n```");
        assert!(!closed.in_fence);
        assert_eq!(closed.fence_language, None);

        let untagged = PartialRenderState::from_text("```\nabc");
        assert!(untagged.in_fence);
        assert_eq!(untagged.fence_language, None);
    }

    #[test]
    fn every_prefix_renders() {
        let full = "Intro ```sql\nSELECT 1;\n``` outro ```py\nprint()\n```";
        for (i, _) in full.char_indices() {
            let prefix = full.get(..i).unwrap_or_default();
            let segments = render(prefix);
            let open = prefix.matches(FENCE).count() % 2 == 1;
            let last_open = matches!(
                segments.last(),
                Some(Segment::Code {
                    complete: false,
                    ..
                })
            );
            assert_eq!(open, last_open, "prefix {prefix:?}");
        }
    }

    #[test]
    fn terminal_output_frames_code() {
        let out = to_terminal(&render("Run:\n```sh\necho hi\n```\n"));
        assert_eq!(out, "Run:\n┌─ sh\n│ echo hi\n└─\n\n");

        let open = to_terminal(&render("```\nabc"));
        assert_eq!(open, "┌─ code\n│ abc\n");
    }

    #[test]
    fn autoscroll_policy() {
        // Near the bottom.
        assert!(should_autoscroll(850.0, 100.0, 1000.0, 5));
        assert!(should_autoscroll(800.0, 100.0, 1000.0, 5));
        // Scrolled up to read.
        assert!(!should_autoscroll(200.0, 100.0, 1000.0, 5));
        // A single message always follows.
        assert!(should_autoscroll(0.0, 100.0, 1000.0, 1));
        assert!(should_autoscroll(0.0, 100.0, 1000.0, 0));
    }
}
