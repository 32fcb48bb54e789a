use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http::{header, HeaderMap, StatusCode};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::error::RelayError;
use crate::finalizer::Finalizer;
use crate::reencoder::{collect_completion, sse_body};
use crate::translator::{parse_request, translate};
use crate::util::{cors_layer, unix_now, AppState};

/// Routes served by [`build_router`].
pub const ROUTES: &[&str] = &[
    "/status",
    "/v1/models",
    "/models",
    "/v1/chat/completions",
    "/chat/completions",
];

/// Build the Axum router over `state`.
pub fn build_router(state: AppState) -> Router {
    let enable_cors = state.config.enable_cors;
    let max_body_bytes = state.config.max_body_bytes;

    let router = Router::new()
        .route("/status", get(status))
        .route("/v1/models", get(list_models))
        .route("/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/chat/completions", post(chat_completions))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state);

    let router = if enable_cors {
        router.layer(cors_layer())
    } else {
        router
    };

    router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Service status: name, version and available routes. Unauthenticated.
async fn status() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "routes": ROUTES,
    }))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), RelayError> {
    if state.is_authorized(headers) {
        Ok(())
    } else {
        tracing::warn!("rejected request with missing or invalid API key");
        Err(RelayError::Auth("missing or invalid API key".into()))
    }
}

async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RelayError> {
    authorize(&state, &headers)?;
    Ok(Json(state.registry.model_list(unix_now())))
}

/// OpenAI Chat Completions over the upstream.
/// - Non-streaming: the upstream stream is drained into one `chat.completion`
/// - Streaming: `chat.completion.chunk` SSE events ending with `data: [DONE]`
///
/// Everything up to opening the upstream chat stream fails with a plain HTTP
/// error; later failures become a terminal `finish_reason: "error"` chunk.
async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    authorize(&state, &headers)?;
    let request = parse_request(&body)?;
    let mut upstream_req = translate(&request, &state.registry, state.config.max_chars)?;

    tracing::info!(
        model = %upstream_req.spec.public_id,
        stream = upstream_req.stream,
        truncated = upstream_req.packed.truncated,
        prompt_chars = upstream_req.packed.chars(),
        dropped_turns = upstream_req.packed.dropped_turns,
        "chat completion request"
    );

    upstream_req.payload.conversation_id = state
        .upstream
        .create_conversation(&upstream_req.spec)
        .await?;
    let upstream = state.upstream.open_chat(&upstream_req.payload).await?;

    let finalizer = Finalizer::new(
        upstream_req.spec.public_id.clone(),
        &upstream_req.packed.prompt_text,
    );
    let idle_timeout = state.config.upstream.idle_timeout;

    if upstream_req.stream {
        let body = Body::from_stream(sse_body(upstream, finalizer, idle_timeout));
        http::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(body)
            .map_err(|e| RelayError::Internal(e.to_string()))
    } else {
        let completion = collect_completion(upstream, &finalizer, idle_timeout).await?;
        Ok(Json(completion).into_response())
    }
}
