//! Terminal chunks, usage accounting and the buffered completion object.

use bytes::Bytes;

use crate::models::chat::{
    ChatChoice, ChatCompletionChunk, ChatCompletionResponse, ChatDelta, ChatResponseMessage,
    ChatStreamChoice, ChatUsage,
};
use crate::reencoder::{DeltaKind, FinishReason, OutboundChunk};
use crate::util::unix_now;

pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Rough token count: four ASCII characters per token (rounded up), one
/// token per other character.
pub fn estimate_tokens(text: &str) -> u64 {
    let (ascii, other) = text.chars().fold((0u64, 0u64), |(a, o), c| {
        if c.is_ascii() {
            (a + 1, o)
        } else {
            (a, o + 1)
        }
    });
    ascii.div_ceil(4) + other
}

/// Per-request identity of the response plus the prompt-side usage.
#[derive(Debug, Clone)]
pub struct Finalizer {
    id: String,
    created: u64,
    model: String,
    prompt_tokens: u64,
}

impl Finalizer {
    pub fn new(model: impl Into<String>, prompt_text: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: unix_now(),
            model: model.into(),
            prompt_tokens: estimate_tokens(prompt_text),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn usage(&self, reasoning: &str, content: &str) -> ChatUsage {
        let reasoning_tokens = estimate_tokens(reasoning);
        let completion_tokens = reasoning_tokens + estimate_tokens(content);
        ChatUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens,
            total_tokens: self.prompt_tokens + completion_tokens,
            reasoning_tokens: Some(reasoning_tokens),
        }
    }

    /// Wire form of one outbound chunk. `usage` belongs on the terminal chunk only.
    pub fn chunk(&self, out: &OutboundChunk, usage: Option<ChatUsage>) -> ChatCompletionChunk {
        let mut delta = ChatDelta {
            role: out.with_role.then(|| "assistant".to_string()),
            ..Default::default()
        };
        match out.delta_kind {
            DeltaKind::Reasoning => delta.reasoning_content = Some(out.text.clone()),
            DeltaKind::Content => delta.content = Some(out.text.clone()),
            DeltaKind::None => {}
        }
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".into(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatStreamChoice {
                index: 0,
                delta,
                finish_reason: out.finish_reason.map(|r| r.as_str().to_string()),
            }],
            usage,
        }
    }

    /// Buffered response for non-streaming calls.
    pub fn completion(&self, reasoning: &str, content: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: self.id.clone(),
            object: "chat.completion".into(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatResponseMessage {
                    role: "assistant".into(),
                    content: Some(content.to_string()),
                    reasoning_content: (!reasoning.is_empty()).then(|| reasoning.to_string()),
                },
                finish_reason: Some(FinishReason::Stop.as_str().to_string()),
            }],
            usage: Some(self.usage(reasoning, content)),
        }
    }
}

/// Frame a chunk as one SSE `data:` event.
pub fn sse_data(chunk: &ChatCompletionChunk) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(chunk)?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}
