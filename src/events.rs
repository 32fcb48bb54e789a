//! Typed view of the upstream chat stream.
//!
//! Frames from [`crate::sse::SseParser`] are decoded into [`UpstreamEvent`]s
//! by their `content_type` and SSE event name, never by matching on content.

use crate::error::RelayError;
use crate::models::upstream::{render_reference_table, Card, UpstreamMessage};
use crate::sse::SseFrame;
use crate::util::strip_tagged_blocks;

/// Event name the upstream sends once the answer is complete.
pub const CHAT_COMPLETED_EVENT: &str = "conversation.chat.completed";
pub const CHAT_FAILED_EVENT: &str = "conversation.chat.failed";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    ThinkingDelta(String),
    AnswerDelta(String),
    /// Rendered reference block for search results.
    Citation(String),
    Done,
    Error(String),
    /// Event kinds the relay does not translate.
    Unknown(String),
}

impl UpstreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpstreamEvent::Done | UpstreamEvent::Error(_))
    }
}

fn is_error_event(name: &str) -> bool {
    name == "error" || name == CHAT_FAILED_EVENT || name.ends_with(".error")
}

/// Decode one frame.
///
/// Fails with [`RelayError::UpstreamProtocol`] when the payload cannot be
/// parsed; callers skip such frames.
pub fn decode_frame(frame: &SseFrame) -> Result<UpstreamEvent, RelayError> {
    let data = frame.data.trim();
    let event = frame.event.as_deref().unwrap_or_default();

    if data == DONE_SENTINEL || event == CHAT_COMPLETED_EVENT || event == "done" {
        return Ok(UpstreamEvent::Done);
    }

    if is_error_event(event) {
        let message = serde_json::from_str::<UpstreamMessage>(data)
            .ok()
            .and_then(|m| m.err_message.or(m.message))
            .unwrap_or_else(|| data.to_string());
        return Ok(UpstreamEvent::Error(message));
    }

    let msg: UpstreamMessage = serde_json::from_str(data).map_err(|e| {
        RelayError::UpstreamProtocol(format!(
            "unparseable event at byte {}: {e}",
            frame.offset
        ))
    })?;

    if msg.success == Some(false) {
        let message = msg
            .err_message
            .or(msg.message)
            .unwrap_or_else(|| "upstream reported failure".to_string());
        return Ok(UpstreamEvent::Error(message));
    }

    let content = msg.content.unwrap_or_default();
    let kind = msg.content_type.unwrap_or_default();
    let event = match kind.as_str() {
        "thinking" => UpstreamEvent::ThinkingDelta(strip_details(&content)),
        "text" => UpstreamEvent::AnswerDelta(strip_details(&content)),
        "card" => decode_card(&content, frame.offset)?,
        _ => UpstreamEvent::Unknown(kind),
    };
    Ok(event)
}

fn strip_details(content: &str) -> String {
    strip_tagged_blocks(content, "<details>", "</details>")
}

fn decode_card(content: &str, offset: u64) -> Result<UpstreamEvent, RelayError> {
    if content.is_empty() {
        return Ok(UpstreamEvent::Unknown("card".into()));
    }
    let card: Card = serde_json::from_str(content).map_err(|e| {
        RelayError::UpstreamProtocol(format!("unparseable card at byte {offset}: {e}"))
    })?;
    let table = card
        .search_sources()
        .and_then(|sources| render_reference_table(&sources));
    Ok(match table {
        Some(t) => UpstreamEvent::Citation(t),
        None => UpstreamEvent::Unknown(format!("card:{}", card.card_type)),
    })
}
