//! OpenAI chat request -> upstream chat payload.

use serde_json::Value;

use crate::error::RelayError;
use crate::models::chat::{ChatCompletionRequest, Role};
use crate::models::upstream::UpstreamChatPayload;
use crate::packer::{pack, strip_think_blocks, ConversationTurn, PackedContext};
use crate::registry::{ModelRegistry, ModelSpec};
use crate::system_prompt_config::InjectionMode;

/// Everything needed to make the upstream calls for one inbound request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub spec: ModelSpec,
    /// `conversation_id` is empty until the conversation is created.
    pub payload: UpstreamChatPayload,
    pub packed: PackedContext,
    pub stream: bool,
}

/// Parse a request body. Shape errors (unknown role, non-boolean `stream`,
/// missing `model`) are validation errors.
pub fn parse_request(body: &[u8]) -> Result<ChatCompletionRequest, RelayError> {
    serde_json::from_slice(body).map_err(|e| RelayError::Validation(e.to_string()))
}

/// Plain text of a message `content`: a string, or an array of text parts
/// joined by newlines. `null` is treated as empty.
pub fn message_text(content: &Value) -> Result<String, RelayError> {
    match content {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Array(parts) => {
            let mut pieces = Vec::with_capacity(parts.len());
            for part in parts {
                let ty = part.get("type").and_then(Value::as_str).unwrap_or_default();
                if ty != "text" && ty != "input_text" {
                    return Err(RelayError::Validation(format!(
                        "unsupported content part type `{ty}`; only text parts are accepted"
                    )));
                }
                let text = part.get("text").and_then(Value::as_str).ok_or_else(|| {
                    RelayError::Validation("text content part without a `text` string".into())
                })?;
                pieces.push(text);
            }
            Ok(pieces.join("\n"))
        }
        _ => Err(RelayError::Validation(
            "message content must be a string or an array of text parts".into(),
        )),
    }
}

/// Build the upstream request for `request`.
pub fn translate(
    request: &ChatCompletionRequest,
    registry: &ModelRegistry,
    max_chars: usize,
) -> Result<UpstreamRequest, RelayError> {
    let spec = registry.resolve(&request.model)?;
    if request.messages.is_empty() {
        return Err(RelayError::Validation(
            "`messages` must contain at least one message".into(),
        ));
    }

    let turns = conversation_turns(request, spec, registry.injection_mode())?;
    let packed = pack(&turns, max_chars);
    let payload = UpstreamChatPayload::new(
        &spec.upstream_id,
        spec.user_actions().join(","),
        packed.prompt_text.clone(),
    );

    tracing::debug!(
        model = %spec.public_id,
        upstream_model = %spec.upstream_id,
        turns = turns.len(),
        prompt_chars = packed.chars(),
        truncated = packed.truncated,
        "translated chat request"
    );

    Ok(UpstreamRequest {
        spec: spec.clone(),
        payload,
        packed,
        stream: request.is_stream(),
    })
}

/// Client messages as turns, with every system message (injected prompt
/// first) merged into one leading system turn.
fn conversation_turns(
    request: &ChatCompletionRequest,
    spec: &ModelSpec,
    mode: InjectionMode,
) -> Result<Vec<ConversationTurn>, RelayError> {
    let injected = spec.injected_system_prompt.as_deref();
    let keep_client_system = injected.is_none() || mode == InjectionMode::Prepend;

    let mut system: Vec<String> = injected.map(|p| p.trim().to_string()).into_iter().collect();
    let mut turns = Vec::with_capacity(request.messages.len() + 1);
    for msg in &request.messages {
        let text = message_text(&msg.content)?;
        match msg.role {
            Role::System => {
                if keep_client_system {
                    let text = strip_think_blocks(&text);
                    if !text.is_empty() {
                        system.push(text);
                    }
                }
            }
            role => turns.push(ConversationTurn::new(role, text)),
        }
    }

    if !system.is_empty() {
        turns.insert(0, ConversationTurn::new(Role::System, system.join("\n")));
    }
    Ok(turns)
}
