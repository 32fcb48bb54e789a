#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use dangbei2api::models::upstream::UpstreamChatPayload;
use dangbei2api::server::build_router;
use dangbei2api::util::AppState;
use dangbei2api::{ByteStream, Config, ModelRegistry, ModelSpec, RelayError, UpstreamTransport};

pub const API_KEY: &str = "sk-test";

/// In-process [`UpstreamTransport`] replaying a fixed SSE byte script.
#[derive(Default)]
pub struct ScriptedUpstream {
    chunks: Vec<Bytes>,
    fail_create: bool,
    conversations: AtomicUsize,
    chats: AtomicUsize,
    payloads: Mutex<Vec<UpstreamChatPayload>>,
}

impl ScriptedUpstream {
    /// Replay `chunks` as separate body reads.
    pub fn new(chunks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            chunks: chunks
                .iter()
                .map(|c| Bytes::copy_from_slice(c.as_bytes()))
                .collect(),
            ..Default::default()
        })
    }

    pub fn failing_create() -> Arc<Self> {
        Arc::new(Self {
            fail_create: true,
            ..Default::default()
        })
    }

    /// Upstream calls of either kind.
    pub fn calls(&self) -> usize {
        self.conversations.load(Ordering::SeqCst) + self.chats.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<UpstreamChatPayload> {
        self.payloads.lock().expect("lock payloads").clone()
    }
}

#[async_trait]
impl UpstreamTransport for ScriptedUpstream {
    async fn create_conversation(&self, spec: &ModelSpec) -> Result<String, RelayError> {
        self.conversations.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(RelayError::UpstreamTransport(
                "conversation create returned HTTP 500 Internal Server Error".into(),
            ));
        }
        Ok(format!("conv-{}", spec.upstream_id))
    }

    async fn open_chat(&self, payload: &UpstreamChatPayload) -> Result<ByteStream, RelayError> {
        self.chats.fetch_add(1, Ordering::SeqCst);
        self.payloads
            .lock()
            .expect("lock payloads")
            .push(payload.clone());
        let items: Vec<Result<Bytes, RelayError>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

/// One upstream `data:` line.
pub fn event(content_type: &str, content: &str) -> String {
    let body = serde_json::json!({
        "role": "assistant",
        "type": "answer",
        "content": content,
        "content_type": content_type,
    });
    format!("event:conversation.message.delta\ndata:{body}\n\n")
}

pub fn completed() -> String {
    "event:conversation.chat.completed\ndata:{\"conversationId\":\"conv\"}\n\n".to_string()
}

pub fn app_with(upstream: Arc<ScriptedUpstream>, config: Config) -> Router {
    let transport: Arc<dyn UpstreamTransport> = upstream;
    build_router(AppState::new(config, ModelRegistry::builtin(), transport))
}

pub fn app(upstream: Arc<ScriptedUpstream>) -> Router {
    app_with(upstream, Config::with_api_key(API_KEY))
}
