//! Plumbing shared by the HTTP providers: wire messages, status checks and
//! splitting a streamed body into records.

use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use squad_core::message::Message;
use squad_core::provider::FinishReason;

use crate::error::RuntimeError;

/// `{role, content}` message shared by the Ollama and OpenAI chat APIs
#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

/// Flatten messages to wire form, with the system prompt first
pub(crate) fn wire_messages(messages: &[Message], system_prompt: Option<&str>) -> Vec<WireMessage> {
    let system = system_prompt.map(|prompt| WireMessage {
        role: "system",
        content: prompt.to_string(),
    });
    system
        .into_iter()
        .chain(messages.iter().map(|message| WireMessage {
            role: match message.role {
                squad_core::Role::User => "user",
                squad_core::Role::Assistant => "assistant",
            },
            content: message.text(),
        }))
        .collect()
}

pub(crate) fn finish_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" | "function_call" => Some(FinishReason::ToolUse),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

/// Turn a non-success response into [`RuntimeError::Http`]
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RuntimeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(status = status.as_u16(), %body, "backend returned an error status");
    Err(RuntimeError::Http {
        status: status.as_u16(),
        body,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Split a streamed body into records separated by `separator`.
///
/// Bytes are buffered across chunk boundaries before decoding, so multi-byte
/// characters split by the network stay intact. A trailing record without a
/// separator is emitted when the body ends.
pub(crate) fn records(
    response: reqwest::Response,
    separator: &'static str,
) -> impl Stream<Item = Result<String, RuntimeError>> + Send {
    let bytes = response.bytes_stream();
    stream::unfold(
        (Box::pin(bytes), Vec::<u8>::new(), false),
        move |(mut bytes, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(end) = find(&buffer, separator.as_bytes()) {
                    let record: Vec<u8> = buffer.drain(..end + separator.len()).take(end).collect();
                    let record = String::from_utf8_lossy(&record).trim().to_string();
                    if record.is_empty() {
                        continue;
                    }
                    return Some((Ok(record), (bytes, buffer, false)));
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(err)) => return Some((Err(RuntimeError::from(err)), (bytes, buffer, true))),
                    None => {
                        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
                        buffer.clear();
                        if rest.is_empty() {
                            return None;
                        }
                        return Some((Ok(rest), (bytes, buffer, true)));
                    }
                }
            }
        },
    )
}
