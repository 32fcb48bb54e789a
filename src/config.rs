//! Process configuration read once at startup.
//!
//! Environment:
//! - API_KEY (required)                     -> inbound bearer key
//! - MAX_CHARS = 80000                      -> packed prompt character budget
//! - MAX_BODY_BYTES = 67108864             -> inbound request body ceiling
//! - ENABLE_CORS = true                     -> permissive CORS layer
//! - LOG_LEVEL = INFO                       -> default tracing level (RUST_LOG wins)
//! - RANDOM_UA = false                      -> pick a browser User-Agent at startup
//! - BIND_ADDR = 0.0.0.0:8000
//! - UPSTREAM_BASE_URL = https://ai-api.dangbei.net
//! - DEVICE_ID                              -> session device id (generated when unset)
//! - SESSION_TOKEN                          -> upstream `token` header (empty when unset)
//! - UPSTREAM_IDLE_TIMEOUT_SECONDS = 1200   -> max wait for the next upstream bytes
//! - UPSTREAM_CONNECT_TIMEOUT_SECONDS = 30
//! - SYSTEM_PROMPT_CONFIG                   -> JSON file with injected system prompts

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;

use crate::sign::generate_device_id;

pub const DEFAULT_MAX_CHARS: usize = 80_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://ai-api.dangbei.net";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 1200;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";

const USER_AGENT_POOL: &[&str] = &[
    DEFAULT_USER_AGENT,
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) \
     Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/133.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:134.0) Gecko/20100101 Firefox/134.0",
];

/// Settings for the upstream chat service.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Pre-provisioned session credential.
    pub device_id: String,
    pub session_token: String,
    pub user_agent: String,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_BASE_URL.into(),
            device_id: generate_device_id(),
            session_token: String::new(),
            user_agent: DEFAULT_USER_AGENT.into(),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// Immutable process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub max_chars: usize,
    /// Inbound body ceiling; histories above `max_chars` must still be accepted.
    pub max_body_bytes: usize,
    pub enable_cors: bool,
    pub log_level: tracing::Level,
    pub bind_addr: String,
    pub upstream: UpstreamConfig,
    pub system_prompt_config: Option<PathBuf>,
}

impl Config {
    /// Defaults with the given inbound key; used by tests and embedders.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            max_chars: DEFAULT_MAX_CHARS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            enable_cors: true,
            log_level: tracing::Level::INFO,
            bind_addr: DEFAULT_BIND_ADDR.into(),
            upstream: UpstreamConfig::default(),
            system_prompt_config: None,
        }
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which returns the raw value of a variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = match get("API_KEY") {
            Some(k) => k,
            None => bail!("API_KEY is not set (mandatory)"),
        };

        let max_chars = match get("MAX_CHARS") {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("MAX_CHARS must be a positive integer, got {v:?}"))?,
            None => DEFAULT_MAX_CHARS,
        };
        if max_chars == 0 {
            bail!("MAX_CHARS must be greater than zero");
        }

        let max_body_bytes = match get("MAX_BODY_BYTES") {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("MAX_BODY_BYTES must be a number of bytes, got {v:?}"))?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        let enable_cors = get("ENABLE_CORS").map(|v| truthy(&v)).unwrap_or(true);
        let random_ua = get("RANDOM_UA").map(|v| truthy(&v)).unwrap_or(false);

        let log_level = match get("LOG_LEVEL") {
            Some(v) => parse_log_level(&v)?,
            None => tracing::Level::INFO,
        };

        let secs = |key: &str, default: u64| -> Result<Duration> {
            match get(key) {
                Some(v) => {
                    let n = v
                        .parse::<u64>()
                        .with_context(|| format!("{key} must be a number of seconds"))?;
                    Ok(Duration::from_secs(n.max(1)))
                }
                None => Ok(Duration::from_secs(default)),
            }
        };

        let user_agent = if random_ua {
            USER_AGENT_POOL
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(DEFAULT_USER_AGENT)
                .to_string()
        } else {
            DEFAULT_USER_AGENT.to_string()
        };

        let upstream = UpstreamConfig {
            base_url: get("UPSTREAM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            device_id: get("DEVICE_ID").unwrap_or_else(generate_device_id),
            session_token: get("SESSION_TOKEN").unwrap_or_default(),
            user_agent,
            idle_timeout: secs("UPSTREAM_IDLE_TIMEOUT_SECONDS", DEFAULT_IDLE_TIMEOUT_SECS)?,
            connect_timeout: secs(
                "UPSTREAM_CONNECT_TIMEOUT_SECONDS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
        };

        Ok(Self {
            api_key,
            max_chars,
            max_body_bytes,
            enable_cors,
            log_level,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            upstream,
            system_prompt_config: get("SYSTEM_PROMPT_CONFIG").map(PathBuf::from),
        })
    }
}

/// 1, true, yes, on (case-insensitive)
pub fn truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_log_level(v: &str) -> Result<tracing::Level> {
    let level = match v.trim().to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" | "critical" => tracing::Level::ERROR,
        other => bail!("LOG_LEVEL must be one of trace, debug, info, warn, error; got {other:?}"),
    };
    Ok(level)
}
