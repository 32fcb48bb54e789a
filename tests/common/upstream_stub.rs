#![allow(dead_code)]

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use http::{header, HeaderMap, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// One request received by the stub.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub path: &'static str,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedCall {
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("stub body is json")
    }
}

/// What the stub answers on the chat endpoint.
#[derive(Clone)]
pub enum ChatReply {
    Sse(String),
    Status(StatusCode),
}

/// Fake upstream chat service bound to an ephemeral port.
#[derive(Clone)]
pub struct UpstreamStub {
    base_url: String,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Clone)]
struct StubState {
    reply: ChatReply,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

pub const CREATE_PATH: &str = "/ai-search/conversationApi/v1/create";
pub const CHAT_PATH: &str = "/ai-search/chatApi/v1/chat";
pub const CONVERSATION_ID: &str = "conv-stub-1";

impl UpstreamStub {
    pub async fn start(reply: ChatReply) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(StubState {
            reply,
            calls: calls.clone(),
        });

        let router = Router::new()
            .route(CREATE_PATH, post(create_handler))
            .route(CHAT_PATH, post(chat_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub upstream");
        let addr = listener.local_addr().expect("stub upstream local addr");
        let (tx, rx) = oneshot::channel::<()>();

        let server = axum::serve(listener, router.into_make_service());
        tokio::spawn(async move {
            tokio::select! {
                res = server => {
                    if let Err(err) = res {
                        eprintln!("Stub upstream server error: {err:?}");
                    }
                }
                _ = rx => {}
            }
        });

        UpstreamStub {
            base_url: format!("http://{}", addr),
            calls,
            shutdown: Arc::new(Mutex::new(Some(tx))),
        }
    }

    pub fn url(&self) -> String {
        self.base_url.clone()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("lock stub calls").clone()
    }
}

impl Drop for UpstreamStub {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.shutdown.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

fn record(state: &StubState, path: &'static str, headers: &HeaderMap, body: String) {
    let headers = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                v.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    if let Ok(mut guard) = state.calls.lock() {
        guard.push(RecordedCall {
            path,
            headers,
            body,
        });
    }
}

async fn create_handler(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    body: String,
) -> Json<serde_json::Value> {
    record(&state, CREATE_PATH, &headers, body);
    Json(serde_json::json!({
        "success": true,
        "errCode": null,
        "errMessage": null,
        "data": {"conversationId": CONVERSATION_ID}
    }))
}

async fn chat_handler(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    record(&state, CHAT_PATH, &headers, body);
    match &state.reply {
        ChatReply::Sse(text) => (
            [(header::CONTENT_TYPE, "text/event-stream")],
            text.clone(),
        )
            .into_response(),
        ChatReply::Status(status) => (*status, "upstream unavailable").into_response(),
    }
}

/// One upstream `data:` line.
pub fn event(content_type: &str, content: &str) -> String {
    let body = serde_json::json!({"content": content, "content_type": content_type});
    format!("event:conversation.message.delta\ndata:{body}\n\n")
}

pub fn completed() -> String {
    "event:conversation.chat.completed\ndata:{}\n\n".to_string()
}
