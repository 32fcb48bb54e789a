//! Outbound calls to the upstream chat service.
//!
//! [`UpstreamTransport`] is the seam between request handling and the
//! network; the router only ever sees the trait object so tests can script
//! the upstream's byte stream.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http::header;

use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::models::upstream::{
    CreateConversationRequest, CreateConversationResponse, UpstreamChatPayload,
};
use crate::registry::ModelSpec;
use crate::sign::Signature;
use crate::util::unix_now;

pub const CREATE_CONVERSATION_PATH: &str = "/ai-search/conversationApi/v1/create";
pub const CHAT_PATH: &str = "/ai-search/chatApi/v1/chat";

const WEB_ORIGIN: &str = "https://ai.dangbei.com";
const APP_TYPE: &str = "6";
const CLIENT_VERSION: &str = "1.0.1";
const CLIENT_LANG: &str = "zh";
/// The web client backdates conversation creation by this many seconds.
const CREATE_CLOCK_SKEW_SECS: u64 = 20;
/// Cap on how much of an error body ends up in logs and error messages.
const ERROR_BODY_PREVIEW: usize = 512;

/// Raw upstream response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Open a fresh upstream conversation for `spec` and return its id.
    async fn create_conversation(&self, spec: &ModelSpec) -> Result<String, RelayError>;

    /// Start the chat call. Returns once response headers are in; the body
    /// is read incrementally through the returned stream.
    async fn open_chat(&self, payload: &UpstreamChatPayload) -> Result<ByteStream, RelayError>;
}

/// [`UpstreamTransport`] over HTTPS with request signing.
pub struct HttpUpstream {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, config: UpstreamConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// POST `body` to `path` with the signature headers for `timestamp`.
    ///
    /// `body` is sent byte for byte as signed.
    fn signed_post(&self, path: &str, body: String, timestamp: u64) -> reqwest::RequestBuilder {
        let sig = Signature::new(timestamp, &body);
        self.client
            .post(self.url(path))
            .header(header::ORIGIN, WEB_ORIGIN)
            .header(header::REFERER, format!("{WEB_ORIGIN}/"))
            .header(header::USER_AGENT, &self.config.user_agent)
            .header(header::CONTENT_TYPE, "application/json")
            .header("appType", APP_TYPE)
            .header("client-ver", CLIENT_VERSION)
            .header("lang", CLIENT_LANG)
            .header("token", &self.config.session_token)
            .header("deviceId", &self.config.device_id)
            .header("nonce", sig.nonce)
            .header("sign", sig.sign)
            .header("timestamp", sig.timestamp)
            .body(body)
    }

    async fn send(&self, rb: reqwest::RequestBuilder) -> Result<reqwest::Response, RelayError> {
        let idle = self.config.idle_timeout;
        match tokio::time::timeout(idle, rb.send()).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) if e.is_timeout() => Err(RelayError::UpstreamTimeout(idle.as_secs())),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(RelayError::UpstreamTimeout(idle.as_secs())),
        }
    }
}

/// Turn a non-2xx response into a transport error carrying a body preview.
async fn reject_status(what: &str, resp: reqwest::Response) -> RelayError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
    tracing::warn!(%status, body = %preview, "{what} rejected by upstream");
    RelayError::UpstreamTransport(format!("{what} returned HTTP {status}"))
}

#[async_trait]
impl UpstreamTransport for HttpUpstream {
    async fn create_conversation(&self, spec: &ModelSpec) -> Result<String, RelayError> {
        let body = serde_json::to_string(&CreateConversationRequest::new(
            spec.chat_model_config(),
        ))?;
        let timestamp = unix_now().saturating_sub(CREATE_CLOCK_SKEW_SECS);
        let resp = self
            .send(self.signed_post(CREATE_CONVERSATION_PATH, body, timestamp))
            .await?;
        if !resp.status().is_success() {
            return Err(reject_status("conversation create", resp).await);
        }

        let envelope: CreateConversationResponse = resp.json().await.map_err(|e| {
            RelayError::UpstreamProtocol(format!("unreadable conversation response: {e}"))
        })?;
        match envelope.data {
            Some(created) if envelope.success && !created.conversation_id.is_empty() => {
                tracing::debug!(
                    conversation_id = %created.conversation_id,
                    model = %spec.public_id,
                    "created upstream conversation"
                );
                Ok(created.conversation_id)
            }
            _ => Err(RelayError::UpstreamProtocol(format!(
                "conversation create failed: {}",
                envelope
                    .err_message
                    .or(envelope.err_code)
                    .unwrap_or_else(|| "no conversation id returned".into())
            ))),
        }
    }

    async fn open_chat(&self, payload: &UpstreamChatPayload) -> Result<ByteStream, RelayError> {
        let body = serde_json::to_string(payload)?;
        let rb = self
            .signed_post(CHAT_PATH, body, unix_now())
            .header(header::ACCEPT, "text/event-stream");
        let resp = self.send(rb).await?;
        if !resp.status().is_success() {
            return Err(reject_status("chat", resp).await);
        }
        Ok(Box::pin(resp.bytes_stream().map_err(RelayError::from)))
    }
}
