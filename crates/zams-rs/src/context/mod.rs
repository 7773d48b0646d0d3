//! Context assembly: the synthesized system message and optional
//! datasource grounding that precede every conversation sent to the
//! provider.
//!
//! The prompt is built from three parts, in order:
//!
//! 1. a fixed formatting instruction (fence code with a language tag),
//! 2. the datasource section, only when a [`DatasourceContext`] is supplied,
//! 3. the response-mode instruction.
//!
//! [`build_request`] prepends exactly one system message and leaves the
//! history untouched.

pub mod datasource;

pub use datasource::{
    Datasource, DatasourceAnalytics, DatasourceContext, DatasourceQuery, DatasourceSource,
    InMemoryDatasources, SortDirection, SortField, StoreError,
};

use serde::{Deserialize, Serialize};

use crate::{Message, MessageRole};

/// How much detail the assistant should give.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Concise,
    Detailed,
}

const FORMATTING_INSTRUCTION: &str = "You are the assistant for a data dashboard. \
Always wrap code, commands, and structured examples in fenced code blocks (```) \
with a language tag, for example ```json or ```python.";

const DATASOURCE_GUIDE: &str = "The user's datasources are listed below as JSON. \
Use them to answer questions such as how many datasources there are, how they \
group by type or by creator, which are the newest or oldest, and how they break \
down by status (Uploaded or Connected).";

const CONCISE_INSTRUCTION: &str = "Be concise.";
const DETAILED_INSTRUCTION: &str = "Be thorough with examples.";

/// Build the system prompt text for `mode`, grounded in `context` if given.
pub fn system_prompt(mode: ResponseMode, context: Option<&DatasourceContext>) -> String {
    let mut prompt = String::from(FORMATTING_INSTRUCTION);

    if let Some(ctx) = context {
        // Plain data; serialization cannot fail.
        let json = serde_json::to_string_pretty(ctx).unwrap_or_else(|_| "{}".to_string());
        prompt.push_str("\n\n");
        prompt.push_str(DATASOURCE_GUIDE);
        prompt.push_str("\n\n```json\n");
        prompt.push_str(&json);
        prompt.push_str("\n```");
    }

    prompt.push_str("\n\n");
    prompt.push_str(match mode {
        ResponseMode::Concise => CONCISE_INSTRUCTION,
        ResponseMode::Detailed => DETAILED_INSTRUCTION,
    });
    prompt
}

/// Prepend the synthesized system message to `history`.
///
/// The returned list always starts with exactly one system message followed
/// by `history` in its original order.
pub fn build_request(
    history: &[Message],
    mode: ResponseMode,
    context: Option<&DatasourceContext>,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system_prompt(mode, context)));
    messages.extend_from_slice(history);
    messages
}

/// Check that `history` is something a client may send: non-empty and free
/// of system messages.
pub fn validate_history(history: &[Message]) -> Result<(), String> {
    if history.is_empty() {
        return Err("messages must be a non-empty array".to_string());
    }
    if let Some(pos) = history.iter().position(|m| m.role == MessageRole::System) {
        return Err(format!("messages[{pos}]: system messages are not accepted"));
    }
    Ok(())
}
