use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use waf_query_bot::api::handlers::AppState;
use waf_query_bot::api::routes::create_router;
use waf_query_bot::config::Config;
use waf_query_bot::services::engine::EngineRegistry;
use waf_query_bot::services::{
    DedupCaches, ExecutorSettings, LlmService, Orchestrator, QueryExecutor, QueryRewriter, SlackService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting server on {}", config.server_address());

    let rewriter = QueryRewriter::from_config(&config.athena).context("invalid timestamp column pattern")?;
    let settings = ExecutorSettings::from_config(&config.athena);
    let registry = Arc::new(EngineRegistry::new(config.athena.clone()));
    let executor = QueryExecutor::new(registry, rewriter, settings);

    let orchestrator = Orchestrator::new(
        Arc::new(LlmService::new(&config.llm, &config.athena)),
        Arc::new(SlackService::new(&config.slack)),
        executor,
        DedupCaches::default(),
        config.display.clone(),
        config.slack.bot_user_id.clone(),
    );

    let shutdown = CancellationToken::new();
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        shutdown: shutdown.clone(),
    };
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C and cancel every in-flight question.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, cancelling in-flight queries");
    shutdown.cancel();
}
