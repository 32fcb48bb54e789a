use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::registry::ModelRegistry;
use crate::upstream::{HttpUpstream, UpstreamTransport};

/// Load dotenv files into the process environment.
///
/// Resolution order:
/// - Explicit paths via ENV_FILE, ENVFILE, DOTENV_PATH
/// - `.env` in the working directory
/// - `.env` in the executable's directory or any of its parents
///
/// Existing variables are never overwritten. Returns a description of the
/// source used, or "none".
pub fn load_env_files() -> String {
    for key in ["ENV_FILE", "ENVFILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                return format!("{p} ({key})");
            }
        }
    }

    if dotenvy::dotenv().is_ok() {
        return ".env".into();
    }

    if let Ok(exe) = std::env::current_exe() {
        let mut dir_opt = exe.parent();
        while let Some(dir) = dir_opt {
            let candidate = dir.join(".env");
            if candidate.is_file() && dotenvy::from_filename(&candidate).is_ok() {
                return candidate.display().to_string();
            }
            dir_opt = dir.parent();
        }
    }

    "none".into()
}

/// Install the global tracing subscriber.
///
/// RUST_LOG wins when set; otherwise `level` applies to the crate and
/// tower_http, with dependencies held at warn.
pub fn init_tracing(level: tracing::Level) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        let level = level.as_str().to_ascii_lowercase();
        format!("warn,dangbei2api={level},tower_http={level}")
    });
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Build the pooled upstream HTTP client.
///
/// Environment:
/// - RELAY_NO_PROXY = 1|true|yes|on  -> disable all proxies
/// - RELAY_PROXY_URL = <url>         -> proxy for all schemes
/// - HTTP_PROXY / http_proxy         -> HTTP proxy
/// - HTTPS_PROXY / https_proxy       -> HTTPS proxy
///
/// Only the connect phase has a timeout here; body reads are bounded per
/// chunk by the idle timeout in the re-encoder.
pub fn build_http_client(config: &Config) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.upstream.connect_timeout)
        .user_agent(config.upstream.user_agent.clone());

    let no_proxy = std::env::var("RELAY_NO_PROXY")
        .map(|v| crate::config::truthy(&v))
        .unwrap_or(false);

    if no_proxy {
        builder = builder.no_proxy();
    } else {
        if let Ok(url) = std::env::var("RELAY_PROXY_URL") {
            let u = url.trim();
            if !u.is_empty() {
                match reqwest::Proxy::all(u) {
                    Ok(p) => builder = builder.proxy(p),
                    Err(e) => tracing::warn!(error = %e, "ignoring invalid RELAY_PROXY_URL"),
                }
            }
        }
        if let Ok(http_p) = std::env::var("HTTP_PROXY").or_else(|_| std::env::var("http_proxy")) {
            let u = http_p.trim();
            if !u.is_empty() {
                if let Ok(p) = reqwest::Proxy::http(u) {
                    builder = builder.proxy(p);
                }
            }
        }
        if let Ok(https_p) = std::env::var("HTTPS_PROXY").or_else(|_| std::env::var("https_proxy"))
        {
            let u = https_p.trim();
            if !u.is_empty() {
                if let Ok(p) = reqwest::Proxy::https(u) {
                    builder = builder.proxy(p);
                }
            }
        }
    }

    builder.build().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to default HTTP client");
        reqwest::Client::new()
    })
}

/// Shared application state used by the HTTP server and handlers.
///
/// Everything here is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ModelRegistry>,
    pub upstream: Arc<dyn UpstreamTransport>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: ModelRegistry,
        upstream: Arc<dyn UpstreamTransport>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            upstream,
        }
    }

    /// State talking to the real upstream over HTTP.
    pub fn with_http_upstream(config: Config, registry: ModelRegistry) -> Self {
        let client = build_http_client(&config);
        let upstream = HttpUpstream::new(client, config.upstream.clone());
        Self::new(config, registry, Arc::new(upstream))
    }

    /// Check an inbound Authorization header against the configured key.
    ///
    /// Accepts `Bearer <key>` as well as the bare key.
    pub fn is_authorized(&self, headers: &http::HeaderMap) -> bool {
        bearer_matches(headers, &self.config.api_key)
    }
}

fn bearer_matches(headers: &http::HeaderMap, api_key: &str) -> bool {
    let Some(raw) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let raw = raw.trim();
    let presented = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    !presented.is_empty() && presented == api_key
}

/// Remove every `open ... close` block from `content`.
///
/// An opening tag without a matching close is kept verbatim.
pub fn strip_tagged_blocks(content: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find(open) {
        let after_open = &rest[start + open.len()..];
        match after_open.find(close) {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &after_open[end + close.len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// Permissive CORS layer: any origin, method and header.
pub fn cors_layer() -> tower_http::cors::CorsLayer {
    tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
