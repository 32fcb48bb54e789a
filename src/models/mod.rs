//! Data models for the OpenAI Chat Completions surface and the upstream wire format.
//!
//! This module groups two submodules:
//! - `chat`: the subset of the OpenAI Chat Completions request/response models the relay speaks.
//! - `upstream`: request bodies, stream messages and citation cards of the upstream chat service.
//!
//! The mapping between the two lives in `crate::translator` (requests) and
//! `crate::reencoder` (streamed responses).

pub mod chat;
pub mod upstream;

pub use chat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatUsage,
    Role,
};
pub use upstream::{CreateConversationRequest, UpstreamChatPayload, UpstreamMessage};
