#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http;
use dangbei2api::server::build_router;
use dangbei2api::util::AppState;
use dangbei2api::{Config, HttpUpstream, ModelRegistry, UpstreamTransport};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const API_KEY: &str = "sk-relay-test";
pub const DEVICE_ID: &str = "0123456789abcdef0123456789abcdef_testdevice0000000000";

/// The real relay router bound to an ephemeral local port, talking to the
/// upstream at `upstream_url` over HTTP.
pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    join: JoinHandle<()>,
    client: reqwest::Client,
}

impl TestServer {
    /// Create a reqwest client with sensible defaults for tests.
    fn make_client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed building reqwest client")
    }

    /// Perform a GET relative to the server base URL.
    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(API_KEY)
            .send()
            .await
    }

    /// Perform an authorized POST with JSON body.
    pub async fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header(http::header::CONTENT_TYPE, "application/json")
            .bearer_auth(API_KEY)
            .json(body)
            .send()
            .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// Config pointing at `upstream_url` with a fixed session credential.
pub fn test_config(upstream_url: &str) -> Config {
    let mut config = Config::with_api_key(API_KEY);
    config.upstream.base_url = upstream_url.to_string();
    config.upstream.device_id = DEVICE_ID.to_string();
    config.upstream.session_token = "session-token".to_string();
    config.upstream.idle_timeout = Duration::from_secs(5);
    config
}

/// Spawn the relay on an ephemeral port.
pub async fn spawn_relay(config: Config) -> TestServer {
    let client = reqwest::Client::builder()
        .no_proxy()
        .user_agent(config.upstream.user_agent.clone())
        .build()
        .expect("upstream client");
    let upstream: Arc<dyn UpstreamTransport> =
        Arc::new(HttpUpstream::new(client, config.upstream.clone()));
    let app = build_router(AppState::new(config, ModelRegistry::builtin(), upstream));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let base_url = format!("http://{}", addr);
    let server = axum::serve(listener, app.into_make_service());

    let join = tokio::spawn(async move {
        if let Err(e) = server.await {
            eprintln!("Test server error: {e:?}");
        }
    });

    TestServer {
        base_url,
        addr,
        join,
        client: TestServer::make_client(),
    }
}
