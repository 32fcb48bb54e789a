use axum::body::Body;
use axum::Router;
use dangbei2api::Config;
use http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

#[path = "common/scripted_upstream.rs"]
mod scripted_upstream;

use scripted_upstream::{app, app_with, completed, event, ScriptedUpstream, API_KEY};

async fn send(app: Router, req: Request<Body>) -> (StatusCode, http::HeaderMap, Vec<u8>) {
    let resp = app.oneshot(req).await.expect("router response");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
        .to_vec();
    (status, headers, body)
}

fn chat_request(body: &Value, auth: Option<&str>) -> Request<Body> {
    let mut rb = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(a) = auth {
        rb = rb.header(header::AUTHORIZATION, a);
    }
    rb.body(Body::from(body.to_string())).expect("request")
}

fn bearer() -> String {
    format!("Bearer {API_KEY}")
}

/// Parse an SSE body into its `data:` payloads.
fn sse_payloads(body: &[u8]) -> Vec<String> {
    std::str::from_utf8(body)
        .expect("utf8 body")
        .split("\n\n")
        .filter_map(|ev| ev.trim().strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn status_is_public() {
    let upstream = ScriptedUpstream::new(&[]);
    let req = Request::get("/status").body(Body::empty()).unwrap();
    let (status, _, body) = send(app(upstream), req).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["name"], "dangbei2api");
    assert!(v["routes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r == "/v1/chat/completions"));
}

#[tokio::test]
async fn models_require_auth_and_list_registry() {
    let upstream = ScriptedUpstream::new(&[]);

    let req = Request::get("/v1/models").body(Body::empty()).unwrap();
    let (status, _, body) = send(app(upstream.clone()), req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["error"]["code"], "invalid_api_key");

    let req = Request::get("/models")
        .header(header::AUTHORIZATION, bearer())
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(app(upstream), req).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["object"], "list");
    let data = v["data"].as_array().unwrap();
    assert_eq!(data.len(), 20);
    assert!(data.iter().any(|m| m["id"] == "deepseek-r1-search"));
    assert!(data.iter().all(|m| m["owned_by"] == "dangbei"));
}

#[tokio::test]
async fn wrong_key_is_rejected_before_upstream() {
    let upstream = ScriptedUpstream::new(&[&completed()]);
    let body = json!({"model": "deepseek-v3", "messages": [{"role": "user", "content": "hi"}]});
    let (status, _, _) = send(
        app(upstream.clone()),
        chat_request(&body, Some("Bearer nope")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = send(app(upstream.clone()), chat_request(&body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn unknown_model_is_404_with_zero_upstream_calls() {
    let upstream = ScriptedUpstream::new(&[&completed()]);
    let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
    let (status, _, body) = send(app(upstream.clone()), chat_request(&body, Some(&bearer()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["error"]["code"], "model_not_found");
    assert_eq!(v["error"]["type"], "invalid_request_error");
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn malformed_requests_are_400() {
    let upstream = ScriptedUpstream::new(&[&completed()]);

    let empty = json!({"model": "deepseek-v3", "messages": []});
    let (status, _, _) = send(app(upstream.clone()), chat_request(&empty, Some(&bearer()))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let bad_stream = json!({
        "model": "deepseek-v3",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": "please"
    });
    let (status, _, _) = send(
        app(upstream.clone()),
        chat_request(&bad_stream, Some(&bearer())),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::post("/v1/chat/completions")
        .header(header::AUTHORIZATION, bearer())
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(app(upstream.clone()), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["error"]["type"], "invalid_request_error");

    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn non_streaming_deepseek_r1_answers() {
    let upstream = ScriptedUpstream::new(&[
        &event("thinking", "Adding two and two."),
        &event("text", "2+2 = "),
        &event("text", "4"),
        &completed(),
    ]);
    let body = json!({"model": "deepseek-r1", "messages": [{"role": "user", "content": "2+2?"}]});
    let (status, _, body) = send(app(upstream.clone()), chat_request(&body, Some(&bearer()))).await;
    assert_eq!(status, StatusCode::OK);

    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["object"], "chat.completion");
    assert_eq!(v["model"], "deepseek-r1");
    let choice = &v["choices"][0];
    assert!(choice["message"]["content"].as_str().unwrap().contains('4'));
    assert_eq!(choice["message"]["reasoning_content"], "Adding two and two.");
    assert_eq!(choice["finish_reason"], "stop");
    assert!(v["usage"]["total_tokens"].as_u64().unwrap() > 0);

    let payloads = upstream.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].question, "User: 2+2?");
    assert_eq!(payloads[0].user_action, "deep");
    assert_eq!(payloads[0].model, "deepseek");
    assert_eq!(payloads[0].conversation_id, "conv-deepseek");
}

#[tokio::test]
async fn streaming_orders_reasoning_content_stop_done() {
    let upstream = ScriptedUpstream::new(&[
        &event("thinking", "a"),
        // a frame split across two reads
        "event:conversation.message.delta\ndata:{\"content\":\"b\",",
        "\"content_type\":\"text\"}\n\n",
        &completed(),
    ]);
    let body = json!({
        "model": "deepseek-r1",
        "messages": [{"role": "user", "content": "x"}],
        "stream": true
    });
    let (status, headers, body) = send(app(upstream), chat_request(&body, Some(&bearer()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");

    let payloads = sse_payloads(&body);
    assert_eq!(payloads.len(), 4);
    assert_eq!(payloads[3], "[DONE]");

    let chunks: Vec<Value> = payloads[..3]
        .iter()
        .map(|p| serde_json::from_str(p).unwrap())
        .collect();
    assert_eq!(chunks[0]["object"], "chat.completion.chunk");
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(chunks[0]["choices"][0]["delta"]["reasoning_content"], "a");
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "b");
    assert!(chunks[1]["choices"][0]["delta"].get("role").is_none());
    assert_eq!(chunks[2]["choices"][0]["finish_reason"], "stop");
    assert_eq!(chunks[2]["usage"]["reasoning_tokens"], 1);
    assert_eq!(chunks[0]["id"], chunks[2]["id"]);
}

#[tokio::test]
async fn streaming_upstream_error_ends_with_error_chunk() {
    let upstream = ScriptedUpstream::new(&[
        &event("text", "partial"),
        "event:error\ndata:{\"errMessage\":\"rate limited\"}\n\n",
        &event("text", "never sent"),
    ]);
    let body = json!({
        "model": "qwen",
        "messages": [{"role": "user", "content": "x"}],
        "stream": true
    });
    let (status, _, body) = send(app(upstream), chat_request(&body, Some(&bearer()))).await;
    assert_eq!(status, StatusCode::OK);

    let payloads = sse_payloads(&body);
    assert_eq!(payloads.last().unwrap(), "[DONE]");
    let terminal: Value = serde_json::from_str(&payloads[payloads.len() - 2]).unwrap();
    assert_eq!(terminal["choices"][0]["finish_reason"], "error");
    assert!(!payloads.iter().any(|p| p.contains("never sent")));
    assert!(payloads[0].contains("partial"));
}

#[tokio::test]
async fn non_streaming_upstream_error_fails_the_call() {
    let upstream = ScriptedUpstream::new(&[
        &event("text", "partial"),
        "data:{\"success\":false,\"errMessage\":\"sign invalid\"}\n\n",
    ]);
    let body = json!({"model": "qwen", "messages": [{"role": "user", "content": "x"}]});
    let (status, _, body) = send(app(upstream), chat_request(&body, Some(&bearer()))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert!(v["error"]["message"]
        .as_str()
        .unwrap()
        .contains("sign invalid"));
    assert!(v.get("choices").is_none());
}

#[tokio::test]
async fn conversation_failure_is_an_http_error() {
    let upstream = ScriptedUpstream::failing_create();
    let body = json!({
        "model": "doubao",
        "messages": [{"role": "user", "content": "x"}],
        "stream": true
    });
    let (status, _, body) = send(app(upstream), chat_request(&body, Some(&bearer()))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["error"]["type"], "upstream_error");
}

#[tokio::test]
async fn search_citation_is_merged_into_answer() {
    let card = json!({
        "cardType": "DB-CARD-2",
        "cardInfo": {"cardItems": [{
            "type": "2002",
            "content": json!([
                {"idIndex": 1, "name": "Rust", "url": "https://www.rust-lang.org", "siteName": "rust-lang.org"}
            ]).to_string()
        }]}
    });
    let upstream = ScriptedUpstream::new(&[
        &event("card", &card.to_string()),
        &event("text", "Rust is a language."),
        &completed(),
    ]);
    let body = json!({"model": "deepseek-v3-search", "messages": [{"role": "user", "content": "rust?"}]});
    let (status, _, body) = send(app(upstream.clone()), chat_request(&body, Some(&bearer()))).await;
    assert_eq!(status, StatusCode::OK);

    let v: Value = serde_json::from_slice(&body).unwrap();
    let content = v["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(content.starts_with("| # | Source | Site |"));
    assert!(content.contains("| 1 | [Rust](https://www.rust-lang.org) | rust-lang.org |"));
    assert!(content.ends_with("\n\nRust is a language."));
    assert_eq!(upstream.payloads()[0].user_action, "online");
}

#[tokio::test]
async fn bare_key_and_alias_route_are_accepted() {
    let upstream = ScriptedUpstream::new(&[&event("text", "ok"), &completed()]);
    let body = json!({"model": "qwen-long", "messages": [{"role": "user", "content": "x"}]});
    let req = Request::post("/chat/completions")
        .header(header::AUTHORIZATION, API_KEY)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _, body) = send(app(upstream), req).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["choices"][0]["message"]["content"], "ok");
}

#[tokio::test]
async fn long_history_is_packed_into_budget() {
    let upstream = ScriptedUpstream::new(&[&event("text", "ok"), &completed()]);
    let mut config = Config::with_api_key(API_KEY);
    config.max_chars = 50;

    let messages: Vec<Value> = (0..5)
        .map(|i| {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            json!({"role": role, "content": format!("{i}").repeat(499) + "Z"})
        })
        .collect();
    let body = json!({"model": "deepseek-v3", "messages": messages});
    let (status, _, _) = send(
        app_with(upstream.clone(), config),
        chat_request(&body, Some(&bearer())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let question = upstream.payloads()[0].question.clone();
    assert!(question.chars().count() <= 50);
    assert!(question.starts_with("User: 4"));
    assert!(question.ends_with("4444Z"));
}

#[tokio::test]
async fn history_above_two_megabytes_is_truncated_not_rejected() {
    let upstream = ScriptedUpstream::new(&[&event("text", "ok"), &completed()]);
    let mut messages: Vec<Value> = (0..30)
        .map(|i| {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            json!({"role": role, "content": "x".repeat(100_000)})
        })
        .collect();
    messages.push(json!({"role": "user", "content": "final question"}));
    let body = json!({"model": "deepseek-v3", "messages": messages});
    assert!(body.to_string().len() > 2 * 1024 * 1024);

    let (status, _, _) = send(app(upstream.clone()), chat_request(&body, Some(&bearer()))).await;
    assert_eq!(status, StatusCode::OK);

    let question = upstream.payloads()[0].question.clone();
    assert!(question.chars().count() <= dangbei2api::config::DEFAULT_MAX_CHARS);
    assert!(question.ends_with("User: final question"));
}

#[tokio::test]
async fn body_above_configured_ceiling_is_413() {
    let upstream = ScriptedUpstream::new(&[]);
    let mut config = Config::with_api_key(API_KEY);
    config.max_body_bytes = 1024;
    let body = json!({
        "model": "deepseek-v3",
        "messages": [{"role": "user", "content": "y".repeat(4096)}]
    });
    let (status, _, _) = send(
        app_with(upstream.clone(), config),
        chat_request(&body, Some(&bearer())),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(upstream.calls(), 0);
}
