#![forbid(unsafe_code)]
#![doc = r#"
Dangbei2API

Serve an OpenAI-compatible Chat Completions API in front of the Dangbei AI
search chat service.

Crate highlights
- Library: the translation engine. `translator::translate` turns a Chat
  Completions request into the upstream's single-prompt payload (via the
  `packer` character budget), and `reencoder` turns the upstream's event
  stream back into `chat.completion.chunk` SSE events or one buffered
  `chat.completion`.
- HTTP server (in `server`): `/v1/chat/completions`, `/v1/models`, `/status`.
- Models: request/response shapes for the OpenAI side and the upstream side.

Modules
- `models`: Data structures for Chat Completions and the upstream API.
- `registry`: Public model ids and their upstream capabilities.
- `packer`: Conversation flattening and truncation.
- `translator`: Request validation and upstream payload assembly.
- `sse` / `events`: Upstream byte stream -> frames -> typed events.
- `reencoder` / `finalizer`: Events -> OpenAI chunks, usage and terminal chunk.
- `upstream`: Signed HTTP calls to the upstream service.
- `server`: Axum router/handlers (the binary uses this).
- `config` / `util`: Startup configuration, tracing, shared state.

Note: truncation is size based and lossy; the upstream keeps no history between calls.
"#]

pub mod config;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod models;
pub mod packer;
pub mod reencoder;
pub mod registry;
pub mod server;
pub mod sign;
pub mod sse;
pub mod system_prompt_config;
pub mod translator;
pub mod upstream;
pub mod util;

pub use crate::config::Config;
pub use crate::error::RelayError;
pub use crate::registry::{ModelRegistry, ModelSpec};
pub use crate::translator::{translate, UpstreamRequest};
pub use crate::upstream::{ByteStream, HttpUpstream, UpstreamTransport};

// Re-export model namespaces for convenience (downstream users can do `use dangbei2api::chat`).
pub use crate::models::{chat, upstream as upstream_models};
