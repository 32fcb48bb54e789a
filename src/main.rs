use anyhow::Context;
use dangbei2api::config::Config;
use dangbei2api::registry::ModelRegistry;
use dangbei2api::server::build_router;
use dangbei2api::system_prompt_config::SystemPromptConfig;
use dangbei2api::util::{init_tracing, load_env_files, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_source = load_env_files();
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(config.log_level);
    tracing::info!("Environment loaded from: {}", env_source);

    let prompts = match &config.system_prompt_config {
        Some(path) => {
            let prompts = SystemPromptConfig::load_from_file(path)?;
            tracing::info!(
                path = %path.display(),
                enabled = prompts.enabled,
                per_model = prompts.per_model.len(),
                has_global = prompts.global.is_some(),
                "Loaded system prompt config"
            );
            prompts
        }
        None => SystemPromptConfig::empty(),
    };
    let registry = ModelRegistry::with_system_prompts(&prompts);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        models = registry.len(),
        max_chars = config.max_chars,
        cors = config.enable_cors,
        upstream = %config.upstream.base_url,
        idle_timeout_secs = config.upstream.idle_timeout.as_secs(),
        "Starting dangbei2api"
    );

    let bind_addr = config.bind_addr.clone();
    let app = build_router(AppState::with_http_upstream(config, registry));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
